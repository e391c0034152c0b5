// author: kodeholic (powered by Claude)
// DTLS provider 경계 — spec §6의 외부 협력자 계약을 트레이트로 굳힌 것입니다.
//
// 실제 레코드/핸드셰이크 상태 머신은 이 크레이트가 구현하지 않습니다 (Non-goal).
// `webrtc` 서브모듈이 `dtls` 크레이트(pion/dtls의 Rust 포트, 원래 팀의 WebRTC
// 의존성)를 감싼 실서비스용 어댑터이고, `testing` 서브모듈이 CID 협상까지
// 포함한 in-memory 목(mock) provider로 session/session_store 테스트를 받칩니다.

pub mod testing;
pub mod webrtc;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::queue_transport::DatagramTransport;

#[derive(Debug)]
pub enum ProviderError {
    Timeout,
    /// 치명적 DTLS alert — 세션 종료 사유로 쓰인다 (spec §7)
    FatalAlert(String),
    /// 상대가 연결을 닫음
    PeerClosed,
    Other(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Timeout => write!(f, "handshake timed out"),
            ProviderError::FatalAlert(msg) => write!(f, "fatal alert: {}", msg),
            ProviderError::PeerClosed => write!(f, "peer closed"),
            ProviderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// provider가 레코드 하나를 내놓을 때 함께 보고하는 분류 플래그 (spec §6).
/// 엔드포인트 마이그레이션 커밋 규칙은 둘 다 true인 레코드에만 적용된다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFlags {
    /// epoch/sequence 순서상 지금까지 수신한 것 중 가장 최신 레코드인가
    pub is_newest: bool,
    /// CID 확장으로 보호된 레코드인가
    pub uses_connection_id: bool,
}

/// 핸드셰이크 완료 시 provider가 공개하는 불투명 key/value — 인증된 identity 등
/// (spec §3 `connection_info`, §6 "underlying TLS-server object").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConnectionInfo {
    pub local_endpoint: Option<SocketAddr>,
    pub remote_endpoint: Option<SocketAddr>,
    pub fields: HashMap<String, String>,
}

impl ConnectionInfo {
    pub fn identity(&self) -> Option<&str> {
        self.fields.get("identity").map(String::as_str)
    }
}

/// 핸드셰이크가 끝난 뒤 남는 레코드 객체. 모든 메서드는 spec §6의
/// "record object" 계약 — `receive`/`receive_pending`/`send`/`get_receive_limit`/`close`
/// 를 그대로 옮긴 것이다.
#[async_trait]
pub trait DtlsRecord: Send + Sync + 'static {
    /// 내부에 버퍼링된 레코드가 없으면 최대 `wait` 만큼 블로킹 대기한다.
    async fn receive(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<(usize, RecordFlags), ProviderError>;

    /// 블로킹하지 않고, 이미 내부 버퍼에 쌓여 있던 레코드가 있으면 반환한다.
    async fn receive_pending(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, RecordFlags)>, ProviderError>;

    async fn send(&self, buf: &[u8]) -> Result<(), ProviderError>;
    fn receive_limit(&self) -> usize;
    async fn close(&self);

    /// 협상된 CID — provider가 RFC 9146을 지원하지 않으면 항상 `None`.
    fn connection_id(&self) -> Option<Vec<u8>>;
    fn connection_info(&self) -> ConnectionInfo;
}

/// 서버측 핸드셰이크 진입점 (spec §6 `DtlsServerProtocol.accept`).
/// `Record`를 연관 타입으로 두어 provider별 구체 타입을 정적 디스패치로 연결한다 —
/// `aws-s2n-quic`의 제네릭 crypto provider 트레이트와 같은 결의 선택이다.
#[async_trait]
pub trait DtlsServerProtocol: Send + Sync + Clone + 'static {
    type Record: DtlsRecord;

    async fn accept(
        &self,
        transport: Arc<dyn DatagramTransport>,
    ) -> Result<Self::Record, ProviderError>;
}
