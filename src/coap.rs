// author: kodeholic (powered by Claude)
// CoAP는 이 크레이트의 책임 밖이다 (Non-goal: CoAP 메시지 파싱/라우팅/URI 구성).
// 여기 있는 것은 "수립된 세션에서 나온 평문 바이트를 누구에게 넘길지"를 정하는
// 경계 트레이트뿐이다. 실제 CoAP 스택은 이 트레이트를 구현하는 쪽의 몫이다.

use async_trait::async_trait;

use crate::dtls_provider::ConnectionInfo;

/// 수립된 DTLS 세션에서 복호화된 애플리케이션 레코드 하나를 받아 응답 바이트를
/// 돌려주는 외부 협력자. `None`은 "이 요청에는 응답이 없다"(예: CoAP NON 메시지)
/// 는 뜻이지, 에러가 아니다.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_request(&self, connection_info: &ConnectionInfo, request: &[u8]) -> Option<Vec<u8>>;
}

/// 어떤 CoAP 스택도 아직 연결되지 않았을 때 쓰는 기본 핸들러 — 받은 그대로 돌려준다.
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(&self, _connection_info: &ConnectionInfo, request: &[u8]) -> Option<Vec<u8>> {
        Some(request.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_handler_returns_input_unchanged() {
        let handler = EchoHandler;
        let info = ConnectionInfo::default();
        let response = handler.handle_request(&info, b"ping").await;
        assert_eq!(response, Some(b"ping".to_vec()));
    }
}
