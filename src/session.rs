// author: kodeholic (powered by Claude)
// Session — 엔드포인트/큐 트랜스포트/DTLS 레코드를 하나로 묶는 연관(association)
// 단위입니다 (spec §4.3). provider 타입에 대해 제네릭해서, 실서비스 provider와
// 목 provider가 같은 Session 코드 경로를 그대로 공유합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::dtls_provider::{ConnectionInfo, DtlsRecord, DtlsServerProtocol, ProviderError, RecordFlags};
use crate::error::{HandshakeOutcome, SessionFault};
use crate::queue_transport::{DatagramTransport, EndpointState, QueueTransport};
use crate::utils::current_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Established,
    Closed,
}

/// 하나의 DTLS 연관. `accepting_by_endpoint`에 들어가 있는 동안은
/// `Handshaking`, 핸드셰이크 성공 후 `established_by_endpoint`/
/// `established_by_cid`로 옮겨지면 `Established`가 된다 (spec §4.4).
pub struct Session<R: DtlsRecord> {
    endpoint: Arc<EndpointState>,
    transport: Arc<QueueTransport>,
    record: RwLock<Option<Arc<R>>>,
    cid: RwLock<Option<Vec<u8>>>,
    state: RwLock<SessionState>,
    session_start_time: u64,
    last_received_time: AtomicU64,
    packets_received: AtomicU64,
    connection_info: RwLock<ConnectionInfo>,
    /// 큐에 새 데이터그램이 들어올 때마다 하나씩 풀리는 카운팅 시그널
    /// (spec §3 data model). `receive()`가 1ms 폴링으로 빠지기 전에 이것을
    /// 먼저 기다려서, 들어오는 트래픽이 없는 동안은 핸들러 태스크가 완전히
    /// 현가(suspend)된다.
    packets_received_signal: Semaphore,
}

impl<R: DtlsRecord> Session<R> {
    /// 반드시 `transport`가 공유하는 `EndpointState`를 그대로 재사용해야 한다 —
    /// 새로 만들면 QueueTransport가 관찰하는 후보 엔드포인트(`note_candidate`)와
    /// Session이 커밋하는 엔드포인트(`commit_pending`)가 서로 다른 객체를 봐서
    /// 마이그레이션이 영영 반영되지 않는다.
    pub fn new(transport: Arc<QueueTransport>) -> Arc<Self> {
        let now = current_timestamp();
        let endpoint = Arc::clone(transport.endpoint_state());
        Arc::new(Self {
            endpoint,
            transport,
            record: RwLock::new(None),
            cid: RwLock::new(None),
            state: RwLock::new(SessionState::Handshaking),
            session_start_time: now,
            last_received_time: AtomicU64::new(now),
            packets_received: AtomicU64::new(0),
            connection_info: RwLock::new(ConnectionInfo::default()),
            packets_received_signal: Semaphore::new(0),
        })
    }

    pub fn endpoint_state(&self) -> &Arc<EndpointState> {
        &self.endpoint
    }

    pub fn transport(&self) -> &Arc<QueueTransport> {
        &self.transport
    }

    pub fn current_endpoint(&self) -> std::net::SocketAddr {
        self.endpoint.current()
    }

    pub fn initial_endpoint(&self) -> std::net::SocketAddr {
        self.endpoint.initial()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn connection_id(&self) -> Option<Vec<u8>> {
        self.cid.read().unwrap().clone()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection_info.read().unwrap().clone()
    }

    pub fn session_start_time(&self) -> u64 {
        self.session_start_time
    }

    pub fn last_received_time(&self) -> u64 {
        self.last_received_time.load(Ordering::Acquire)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// inbound demux 태스크가 이 세션 소유라고 분류한 데이터그램을 전달한다.
    /// 핸들러 태스크가 아직 `receive()`를 호출하기 전에 도착한 데이터그램도
    /// QueueTransport의 unbounded 채널이 버퍼링하므로 유실되지 않는다.
    pub fn enqueue_datagram(&self, bytes: Vec<u8>, source_endpoint: std::net::SocketAddr) {
        self.last_received_time
            .store(current_timestamp(), Ordering::Release);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.transport.enqueue_received(bytes, source_endpoint);
        // 시그널 생성(=세션 생성) 시점 이후의 모든 enqueue가 빠짐없이 허가를
        // 하나씩 쌓으므로, handshaking 중에 도착한 데이터그램도 `receive()`가
        // established 이후에 놓치지 않는다 — 별도의 "pre-release" 단계가
        // 필요 없다.
        self.packets_received_signal.add_permits(1);
    }

    /// 핸드셰이크를 수행한다. 성공하면 `Established`로 전이하고 레코드/CID/
    /// connection_info를 고정한다. 실패해도 다른 세션에는 영향을 주지 않는다
    /// (spec §7 "user-visible behavior").
    pub async fn accept<P>(&self, protocol: &P) -> Result<(), SessionFault>
    where
        P: DtlsServerProtocol<Record = R>,
    {
        let transport = Arc::clone(&self.transport) as Arc<dyn DatagramTransport>;
        match protocol.accept(transport).await {
            Ok(record) => {
                *self.cid.write().unwrap() = record.connection_id();
                *self.connection_info.write().unwrap() = record.connection_info();
                *self.record.write().unwrap() = Some(Arc::new(record));
                *self.state.write().unwrap() = SessionState::Established;
                debug!(endpoint = %self.current_endpoint(), "session established");
                Ok(())
            }
            Err(e) => Err(Self::classify_receive_error(e)),
        }
    }

    /// 핸드셰이크 이후 애플리케이션 레코드를 하나 수신한다. CID로 보호된 최신
    /// 레코드가 들어오면 보류 중이던 엔드포인트 마이그레이션을 커밋한다
    /// (RFC 9146 §6). 순서는 (i) provider에 이미 디코딩되어 쌓여 있는 레코드를
    /// 블로킹 없이 먼저 비우고, (ii) 새 데이터그램이 도착했다는 시그널을
    /// 기다려 완전히 현가되었다가, (iii) 마지막 수단으로만 `wait` 길이의 짧은
    /// 폴링을 한 번 수행한다. 이렇게 하면 트래픽이 없는 세션은 매 밀리초마다
    /// provider의 수신 future를 취소/재시작하는 대신 실제로 잠들어 있는다.
    pub async fn receive(&self, buf: &mut [u8], wait: Duration) -> Result<usize, SessionFault> {
        let record = {
            let guard = self.record.read().unwrap();
            guard.as_ref().cloned()
        };
        let record = record.ok_or(SessionFault::Cancelled)?;

        if let Some((n, flags)) = record
            .receive_pending(buf)
            .await
            .map_err(Self::classify_receive_error)?
        {
            self.apply_migration(flags);
            self.last_received_time
                .store(current_timestamp(), Ordering::Release);
            return Ok(n);
        }

        tokio::select! {
            _ = self.transport.closed_token().notified() => return Err(SessionFault::Cancelled),
            permit = self.packets_received_signal.acquire() => {
                match permit {
                    Ok(permit) => permit.forget(),
                    Err(_closed) => return Err(SessionFault::Cancelled),
                }
            }
        }

        match record.receive(buf, wait).await {
            Ok((n, flags)) => {
                self.apply_migration(flags);
                self.last_received_time
                    .store(current_timestamp(), Ordering::Release);
                Ok(n)
            }
            Err(e) => Err(Self::classify_receive_error(e)),
        }
    }

    fn apply_migration(&self, flags: RecordFlags) {
        if flags.is_newest && flags.uses_connection_id {
            if let Some(new_endpoint) = self.endpoint.commit_pending() {
                debug!(new_endpoint = %new_endpoint, "endpoint migration committed");
            }
        }
    }

    fn classify_receive_error(e: ProviderError) -> SessionFault {
        match e {
            ProviderError::Timeout => {
                SessionFault::Handshake(HandshakeOutcome::TlsTimeout, ProviderError::Timeout)
            }
            ProviderError::PeerClosed => SessionFault::PeerClosed,
            ProviderError::FatalAlert(msg) => SessionFault::FatalAlert(msg),
            e @ ProviderError::Other(_) => {
                SessionFault::Handshake(HandshakeOutcome::TlsError, e)
            }
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<(), SessionFault> {
        let record = {
            let guard = self.record.read().unwrap();
            guard.as_ref().cloned()
        };
        let record = record.ok_or(SessionFault::Cancelled)?;
        record.send(buf).await.map_err(|e| match e {
            ProviderError::PeerClosed => SessionFault::PeerClosed,
            ProviderError::FatalAlert(msg) => SessionFault::FatalAlert(msg),
            other => SessionFault::Handshake(HandshakeOutcome::TlsError, other),
        })
    }

    /// 세션을 닫는다. `notify_peer`가 false이거나 DTLS 레코드가 아직 없으면
    /// Queue Transport를 먼저 닫는다 — provider가 닫힌 전송 위로 close_notify
    /// alert를 내보내려 해도 `send`가 실패하며 조용히 무시되기 때문이다
    /// (spec §4.3). `notify_peer`가 true이고 레코드가 있으면 평소 순서대로
    /// 레코드를 먼저 닫아 alert가 실제로 나갈 수 있게 한다. 멱등적이다 —
    /// 두 번째 호출은 이미 빈 record/닫힌 transport를 다시 닫을 뿐이다.
    pub async fn close(&self, notify_peer: bool) {
        *self.state.write().unwrap() = SessionState::Closed;
        let record = self.record.write().unwrap().take();

        if !notify_peer || record.is_none() {
            self.transport.close().await;
            if let Some(record) = record {
                record.close().await;
            }
        } else if let Some(record) = record {
            record.close().await;
            self.transport.close().await;
        }
        warn!(endpoint = %self.current_endpoint(), notify_peer, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtls_provider::testing::MockDtlsServerProtocol;
    use crate::queue_transport::QueueTransport;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex as StdMutex;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn loopback_pair() -> (Arc<QueueTransport>, Arc<QueueTransport>) {
        let client_ep = EndpointState::new(addr(10));
        let server_ep = EndpointState::new(addr(11));

        let server_slot: Arc<StdMutex<Option<Arc<QueueTransport>>>> = Arc::new(StdMutex::new(None));
        let client_slot: Arc<StdMutex<Option<Arc<QueueTransport>>>> = Arc::new(StdMutex::new(None));

        let server_slot_for_client = Arc::clone(&server_slot);
        let client = QueueTransport::new(
            client_ep,
            1472,
            1408,
            Arc::new(move |bytes, _addr| {
                if let Some(server) = server_slot_for_client.lock().unwrap().as_ref() {
                    server.enqueue_received(bytes, addr(10));
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
                    client.enqueue_received(bytes, addr(11));
                }
            }),
        );

        *server_slot.lock().unwrap() = Some(Arc::clone(&server));
        *client_slot.lock().unwrap() = Some(Arc::clone(&client));

        (client, server)
    }

    #[tokio::test]
    async fn accept_establishes_session_and_records_cid() {
        let (client, server) = loopback_pair();
        let session = Session::new(server);
        let protocol = MockDtlsServerProtocol::new().with_connection_id(4);

        client.send(crate::dtls_provider::testing::HELLO_MARKER).await.unwrap();
        session.accept(&protocol).await.unwrap();

        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.connection_id().map(|c| c.len()), Some(4));
    }

    #[tokio::test]
    async fn receive_after_close_fails() {
        let (client, server) = loopback_pair();
        let session = Session::new(server);
        let protocol = MockDtlsServerProtocol::new();

        client.send(crate::dtls_provider::testing::HELLO_MARKER).await.unwrap();
        session.accept(&protocol).await.unwrap();
        session.close(true).await;

        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn close_without_notify_peer_closes_transport_before_record() {
        let (client, server) = loopback_pair();
        let session = Session::new(server);
        let protocol = MockDtlsServerProtocol::new();

        client.send(crate::dtls_provider::testing::HELLO_MARKER).await.unwrap();
        session.accept(&protocol).await.unwrap();
        session.close(false).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.transport().is_closed());
    }
}
