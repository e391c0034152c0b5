// author: kodeholic (powered by Claude)
// `dtls` 크레이트(webrtc-rs, pion/dtls의 Rust 포트)를 감싼 실서비스용 provider.
//
// 원래 팀의 media/dtls.rs가 WebRTC DTLS-SRTP 핸드셰이크를 위해 썼던 것과 같은
// 크레이트를 PSK 서버 인증에 맞게 다시 배선한 것. `UdpConnAdapter`가 하던 일 —
// webrtc_util::Conn을 세션당 큐 위에 얹는 것 — 을 QueueTransport 위에서
// `DatagramTransport`에 대해 제네릭하게 반복한다.
//
// 제약: `dtls` 크레이트는 RFC 9146 Connection ID 확장을 구현하지 않는다.
// 이 provider가 보고하는 레코드는 항상 `uses_connection_id: false`이다 —
// CID가 필요한 배포에서는 `testing` provider이거나 다른 provider가 필요하다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dtls::config::Config as DtlsConfig;
use dtls::conn::DTLSConn;
use dtls::crypto::Certificate;
use webrtc_util::conn::Conn;
use webrtc_util::Error as UtilError;

use crate::queue_transport::{DatagramTransport, RECEIVE_CANCELLED};

use super::{ConnectionInfo, DtlsRecord, DtlsServerProtocol, ProviderError, RecordFlags};

/// `QueueTransport`(우리 쪽 전송 계약)를 `webrtc_util::Conn`(dtls 크레이트가
/// 기대하는 전송 계약) 위에 얹는 어댑터. 원래 팀의 `UdpConnAdapter`와 같은 역할.
struct ConnAdapter {
    inner: Arc<dyn DatagramTransport>,
    local_addr: SocketAddr,
}

#[async_trait]
impl Conn for ConnAdapter {
    async fn connect(&self, _addr: SocketAddr) -> webrtc_util::Result<()> {
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> webrtc_util::Result<usize> {
        loop {
            let n = self.inner.receive(buf, Duration::from_secs(5)).await;
            if n >= 0 {
                return Ok(n as usize);
            }
            if n == RECEIVE_CANCELLED {
                return Err(UtilError::Other("transport closed".to_owned()));
            }
            // 음수 타임아웃 sentinel: dtls 크레이트 입장에서는 블로킹 recv가
            // 계속되는 것처럼 보이도록 다시 기다린다.
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> webrtc_util::Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        Ok((n, self.local_addr))
    }

    async fn send(&self, buf: &[u8]) -> webrtc_util::Result<usize> {
        self.inner
            .send(buf)
            .await
            .map(|_| buf.len())
            .map_err(|e| UtilError::Other(e.to_string()))
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> webrtc_util::Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> webrtc_util::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&self) -> webrtc_util::Result<()> {
        self.inner.close().await;
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

/// PSK 조회 콜백 — identity hint에 대응하는 키를 돌려준다. 실패하면 핸드셰이크가
/// alert로 끝난다.
pub type PskLookup = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

#[derive(Clone)]
pub enum ServerCredential {
    Psk {
        identity_hint: Vec<u8>,
        lookup: PskLookup,
    },
    Certificate(Certificate),
}

#[derive(Clone)]
pub struct WebrtcDtlsServerProtocol {
    credential: ServerCredential,
}

impl WebrtcDtlsServerProtocol {
    pub fn with_psk(identity_hint: Vec<u8>, lookup: PskLookup) -> Self {
        Self {
            credential: ServerCredential::Psk {
                identity_hint,
                lookup,
            },
        }
    }

    pub fn with_certificate(cert: Certificate) -> Self {
        Self {
            credential: ServerCredential::Certificate(cert),
        }
    }

    fn build_config(&self) -> DtlsConfig {
        let mut cfg = DtlsConfig::default();
        match &self.credential {
            ServerCredential::Psk {
                identity_hint,
                lookup,
            } => {
                let lookup = Arc::clone(lookup);
                cfg.psk = Some(Arc::new(move |hint: &[u8]| {
                    lookup(hint).map_err(|e| dtls::Error::Other(e))
                }));
                cfg.psk_identity_hint = Some(identity_hint.clone());
            }
            ServerCredential::Certificate(cert) => {
                cfg.certificates = vec![cert.clone()];
            }
        }
        cfg
    }
}

#[async_trait]
impl DtlsServerProtocol for WebrtcDtlsServerProtocol {
    type Record = WebrtcDtlsRecord;

    async fn accept(
        &self,
        transport: Arc<dyn DatagramTransport>,
    ) -> Result<Self::Record, ProviderError> {
        let receive_limit = transport.receive_limit();
        let local_addr = "0.0.0.0:0".parse().unwrap();
        let conn: Arc<dyn Conn + Send + Sync> = Arc::new(ConnAdapter {
            inner: transport,
            local_addr,
        });

        let dtls_conn = DTLSConn::new(conn, self.build_config(), false, None)
            .await
            .map_err(|e| classify_handshake_error(&e))?;

        let identity = extract_psk_identity(&dtls_conn).await;

        Ok(WebrtcDtlsRecord {
            conn: dtls_conn,
            receive_limit,
            identity: StdMutex::new(identity),
        })
    }
}

fn classify_handshake_error(e: &dtls::Error) -> ProviderError {
    let msg = e.to_string();
    if msg.to_lowercase().contains("timeout") {
        ProviderError::Timeout
    } else {
        ProviderError::Other(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_transport::{EndpointState, QueueTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex2;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    /// 서로의 큐에 직접 써 주는 한 쌍의 QueueTransport — `dtls_provider::testing`의
    /// loopback_pair와 같은 모양. 진짜 핸드셰이크 없이 ConnAdapter의 Conn 구현을
    /// 확인하는 데만 쓴다.
    fn loopback_pair() -> (Arc<QueueTransport>, Arc<QueueTransport>) {
        let client_ep = EndpointState::new(addr(1));
        let server_ep = EndpointState::new(addr(2));

        let server_slot: Arc<StdMutex2<Option<Arc<QueueTransport>>>> =
            Arc::new(StdMutex2::new(None));
        let client_slot: Arc<StdMutex2<Option<Arc<QueueTransport>>>> =
            Arc::new(StdMutex2::new(None));

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

    #[test]
    fn classify_handshake_error_recognizes_timeout_messages() {
        let timeout_err = dtls::Error::Other("handshake timeout exceeded".to_owned());
        assert!(matches!(
            classify_handshake_error(&timeout_err),
            ProviderError::Timeout
        ));

        // Case-insensitive: the dtls crate doesn't guarantee a fixed case.
        let shouting_err = dtls::Error::Other("TIMEOUT waiting for flight".to_owned());
        assert!(matches!(
            classify_handshake_error(&shouting_err),
            ProviderError::Timeout
        ));
    }

    #[test]
    fn classify_handshake_error_falls_back_to_other() {
        let alert_err = dtls::Error::Other("alert: bad_record_mac".to_owned());
        match classify_handshake_error(&alert_err) {
            ProviderError::Other(msg) => assert!(msg.contains("bad_record_mac")),
            other => panic!("expected ProviderError::Other, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conn_adapter_roundtrips_over_queue_transport() {
        let (client, server) = loopback_pair();
        let adapter = ConnAdapter {
            inner: server,
            local_addr: addr(2),
        };

        client.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = adapter.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        adapter.send(b"world").await.unwrap();
        let mut client_buf = [0u8; 16];
        let n = client
            .receive(&mut client_buf, Duration::from_millis(100))
            .await;
        assert!(n > 0);
        assert_eq!(&client_buf[..n as usize], b"world");

        assert_eq!(adapter.local_addr().unwrap(), addr(2));
        assert!(adapter.remote_addr().is_none());
    }

    #[tokio::test]
    async fn conn_adapter_close_surfaces_through_receive() {
        let (_client, server) = loopback_pair();
        let adapter = ConnAdapter {
            inner: Arc::clone(&server),
            local_addr: addr(2),
        };

        adapter.close().await.unwrap();
        let mut buf = [0u8; 16];
        let result = adapter.recv(&mut buf).await;
        assert!(result.is_err(), "recv after close must surface an error");
    }
}

async fn extract_psk_identity(conn: &DTLSConn) -> Option<String> {
    let state = conn.connection_state().await;
    state
        .identity_hint
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub struct WebrtcDtlsRecord {
    conn: DTLSConn,
    receive_limit: usize,
    identity: StdMutex<Option<String>>,
}

#[async_trait]
impl DtlsRecord for WebrtcDtlsRecord {
    async fn receive(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<(usize, RecordFlags), ProviderError> {
        match tokio::time::timeout(wait, self.conn.read(buf, None)).await {
            Ok(Ok(n)) => Ok((
                n,
                RecordFlags {
                    is_newest: true,
                    // 문서화된 제약: 이 provider는 RFC 9146을 구현하지 않는다.
                    uses_connection_id: false,
                },
            )),
            Ok(Err(e)) => Err(ProviderError::Other(e.to_string())),
            Err(_elapsed) => Err(ProviderError::Timeout),
        }
    }

    async fn receive_pending(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, RecordFlags)>, ProviderError> {
        match tokio::time::timeout(Duration::from_millis(0), self.conn.read(buf, None)).await {
            Ok(Ok(n)) => Ok(Some((
                n,
                RecordFlags {
                    is_newest: true,
                    uses_connection_id: false,
                },
            ))),
            Ok(Err(e)) => Err(ProviderError::Other(e.to_string())),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<(), ProviderError> {
        self.conn
            .write(buf, None)
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Other(e.to_string()))
    }

    fn receive_limit(&self) -> usize {
        self.receive_limit
    }

    async fn close(&self) {
        let _ = self.conn.close().await;
    }

    fn connection_id(&self) -> Option<Vec<u8>> {
        None
    }

    fn connection_info(&self) -> ConnectionInfo {
        let mut fields = HashMap::new();
        if let Some(identity) = self.identity.lock().unwrap().clone() {
            fields.insert("identity".to_owned(), identity);
        }
        ConnectionInfo {
            local_endpoint: None,
            remote_endpoint: None,
            fields,
        }
    }
}
