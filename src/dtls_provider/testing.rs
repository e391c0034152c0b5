// author: kodeholic (powered by Claude)
// In-memory 목(mock) DTLS provider. 실제 암호화는 전혀 하지 않는다 — 오직
// session/session_store의 CID 협상, 마이그레이션, 조회 우선순위 불변식을
// 진짜 크립토 없이 테스트하기 위한 것이다 (spec §8 Testable Properties).
//
// `aws-s2n-quic`의 `crypto::tls::testing` 서브모듈과 같은 자리 — "testing"은
// cfg(test) 뒤에 숨지 않는다. 통합 테스트(tests/)에서도 이 provider를 쓴다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;

use crate::queue_transport::{DatagramTransport, RECEIVE_CANCELLED, RECEIVE_TIMEOUT};

use super::{ConnectionInfo, DtlsRecord, DtlsServerProtocol, ProviderError, RecordFlags};

/// Shaped to satisfy `record_parser::may_be_client_hello` (content type =
/// handshake, first handshake-message byte = client_hello) so a real
/// `Transport` routes it to `spawn_handler` exactly as it would a genuine
/// ClientHello, instead of only working when a test calls `Session::accept`
/// directly.
pub const HELLO_MARKER: &[u8] = &[
    22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // 13-byte DTLS record header
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // handshake msg type (client_hello) + padding
];
const WELCOME_MARKER: &[u8] = b"MOCKWELCOME";

/// 실제 레코드 대신 평문 프레임을 주고받는 목 provider.
/// `cid_len`이 `Some`이면 accept마다 그 길이의 무작위 CID를 협상해 돌려준다 —
/// 스펙이 요구하는 "provider가 CID 사용 여부/길이를 정한다"를 흉내낸다.
///
/// `cid_lens`를 쓰면 accept 호출마다 목록의 다음 길이를 꺼내 쓴다 (목록을 다
/// 쓰면 마지막 값을 반복) — 같은 `Transport` 하나로 "첫 핸드셰이크는 CID 길이
/// N, 두 번째는 다른 길이 M을 협상한다"는 시나리오를 만들기 위한 것이다.
#[derive(Clone)]
pub struct MockDtlsServerProtocol {
    cid_len: Option<usize>,
    cid_lens: Option<Vec<usize>>,
    call_count: Arc<std::sync::atomic::AtomicUsize>,
    handshake_timeout: Duration,
}

impl MockDtlsServerProtocol {
    pub fn new() -> Self {
        Self {
            cid_len: None,
            cid_lens: None,
            call_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connection_id(mut self, len: usize) -> Self {
        self.cid_len = Some(len);
        self
    }

    /// accept 호출 순서대로 `lens[0]`, `lens[1]`, ... 길이의 CID를 협상한다.
    /// `with_connection_id`보다 우선한다.
    pub fn with_connection_id_sequence(mut self, lens: Vec<usize>) -> Self {
        self.cid_lens = Some(lens);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn next_cid_len(&self) -> Option<usize> {
        if let Some(lens) = &self.cid_lens {
            let idx = self
                .call_count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            lens.get(idx).or_else(|| lens.last()).copied()
        } else {
            self.cid_len
        }
    }
}

impl Default for MockDtlsServerProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DtlsServerProtocol for MockDtlsServerProtocol {
    type Record = MockDtlsRecord;

    async fn accept(
        &self,
        transport: Arc<dyn DatagramTransport>,
    ) -> Result<Self::Record, ProviderError> {
        let mut buf = vec![0u8; transport.receive_limit()];
        let n = transport.receive(&mut buf, self.handshake_timeout).await;
        if n == RECEIVE_TIMEOUT {
            return Err(ProviderError::Timeout);
        }
        if n == RECEIVE_CANCELLED {
            return Err(ProviderError::PeerClosed);
        }
        let n = n as usize;
        if &buf[..n.min(HELLO_MARKER.len())] != HELLO_MARKER {
            return Err(ProviderError::Other("unrecognized mock hello".to_owned()));
        }

        let cid = self.next_cid_len().map(|len| {
            let mut bytes = vec![0u8; len];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        });

        let mut response = WELCOME_MARKER.to_vec();
        if let Some(cid) = &cid {
            response.extend_from_slice(cid);
        }
        transport
            .send(&response)
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        Ok(MockDtlsRecord { transport, cid })
    }
}

pub struct MockDtlsRecord {
    transport: Arc<dyn DatagramTransport>,
    cid: Option<Vec<u8>>,
}

#[async_trait]
impl DtlsRecord for MockDtlsRecord {
    async fn receive(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<(usize, RecordFlags), ProviderError> {
        let n = self.transport.receive(buf, wait).await;
        if n == RECEIVE_TIMEOUT {
            return Err(ProviderError::Timeout);
        }
        if n == RECEIVE_CANCELLED {
            return Err(ProviderError::PeerClosed);
        }
        Ok((
            n as usize,
            RecordFlags {
                is_newest: true,
                uses_connection_id: self.cid.is_some(),
            },
        ))
    }

    async fn receive_pending(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, RecordFlags)>, ProviderError> {
        let n = self.transport.receive(buf, Duration::from_millis(0)).await;
        if n == RECEIVE_TIMEOUT {
            return Ok(None);
        }
        if n == RECEIVE_CANCELLED {
            return Err(ProviderError::PeerClosed);
        }
        Ok(Some((
            n as usize,
            RecordFlags {
                is_newest: true,
                uses_connection_id: self.cid.is_some(),
            },
        )))
    }

    async fn send(&self, buf: &[u8]) -> Result<(), ProviderError> {
        self.transport
            .send(buf)
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))
    }

    fn receive_limit(&self) -> usize {
        self.transport.receive_limit()
    }

    async fn close(&self) {
        self.transport.close().await;
    }

    fn connection_id(&self) -> Option<Vec<u8>> {
        self.cid.clone()
    }

    fn connection_info(&self) -> ConnectionInfo {
        let mut fields = HashMap::new();
        fields.insert("identity".to_owned(), "mock-client".to_owned());
        ConnectionInfo {
            local_endpoint: None,
            remote_endpoint: None,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_transport::{EndpointState, QueueTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    /// 서로의 큐에 직접 써 주는 한 쌍의 QueueTransport — 실제 소켓 없이 핸드셰이크를
    /// 주고받을 수 있게 루프백을 흉내낸다.
    fn loopback_pair() -> (Arc<QueueTransport>, Arc<QueueTransport>) {
        let client_ep = EndpointState::new(addr(1));
        let server_ep = EndpointState::new(addr(2));

        let server_slot: Arc<StdMutex<Option<Arc<QueueTransport>>>> = Arc::new(StdMutex::new(None));
        let client_slot: Arc<StdMutex<Option<Arc<QueueTransport>>>> = Arc::new(StdMutex::new(None));

        let server_slot_for_client = Arc::clone(&server_slot);
        let client = QueueTransport::new(
            client_ep,
            1472,
            1408,
            Arc::new(move |bytes, _addr| {
                if let Some(server) = server_slot_for_client.lock().unwrap().as_ref() {
                    server.enqueue_received(bytes, addr(1));
                }
            }),
        );

        let client_slot_for_server = Arc::clone(&client_slot);
        let server = QueueTransport::new(
            server_ep,
            1472,
            1408,
            Arc::new(move |bytes, _addr| {
                if let Some(client) = client_slot_for_server.lock().unwrap().as_ref() {
                    client.enqueue_received(bytes, addr(2));
                }
            }),
        );

        *server_slot.lock().unwrap() = Some(Arc::clone(&server));
        *client_slot.lock().unwrap() = Some(Arc::clone(&client));

        (client, server)
    }

    #[tokio::test]
    async fn accept_negotiates_configured_cid_length() {
        let (client, server) = loopback_pair();
        let protocol = MockDtlsServerProtocol::new().with_connection_id(4);

        client.send(HELLO_MARKER).await.unwrap();
        let record = protocol
            .accept(server as Arc<dyn DatagramTransport>)
            .await
            .unwrap();

        let cid = record.connection_id().expect("cid negotiated");
        assert_eq!(cid.len(), 4);

        let mut buf = [0u8; 64];
        let n = client.receive(&mut buf, Duration::from_millis(100)).await;
        assert!(n > 0);
        assert_eq!(&buf[..WELCOME_MARKER.len()], WELCOME_MARKER);
    }

    #[tokio::test]
    async fn accept_without_cid_reports_no_connection_id() {
        let (client, server) = loopback_pair();
        let protocol = MockDtlsServerProtocol::new();

        client.send(HELLO_MARKER).await.unwrap();
        let record = protocol
            .accept(server as Arc<dyn DatagramTransport>)
            .await
            .unwrap();

        assert_eq!(record.connection_id(), None);
        let flags_check = record.receive_pending(&mut [0u8; 16]).await.unwrap();
        assert!(flags_check.is_none());
    }

    #[tokio::test]
    async fn accept_times_out_without_hello() {
        let (_client, server) = loopback_pair();
        let protocol =
            MockDtlsServerProtocol::new().with_handshake_timeout(Duration::from_millis(20));

        let result = protocol.accept(server as Arc<dyn DatagramTransport>).await;
        assert!(matches!(result, Err(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn established_record_roundtrips_application_data() {
        let (client, server) = loopback_pair();
        let protocol = MockDtlsServerProtocol::new().with_connection_id(2);

        client.send(HELLO_MARKER).await.unwrap();
        let record = protocol
            .accept(server as Arc<dyn DatagramTransport>)
            .await
            .unwrap();

        let mut welcome_buf = [0u8; 64];
        client
            .receive(&mut welcome_buf, Duration::from_millis(100))
            .await;

        client.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, flags) = record
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert!(flags.uses_connection_id);
    }
}
