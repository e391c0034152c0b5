// author: kodeholic (powered by Claude)
// Transport — 소켓 하나를 모든 DTLS 연관에 걸쳐 demux하는 최상위 조립체입니다
// (spec §4.5). inbound 분류 루프, outbound 드레인 루프, 유휴 reaper, 세션당
// 핸들러 태스크를 한데 묶는다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

use crate::coap::RequestHandler;
use crate::config::Config;
use crate::dtls_provider::DtlsServerProtocol;
use crate::error::{GatewayResult, SessionFault};
use crate::queue_transport::{EndpointState, QueueTransport};
use crate::record_parser::{may_be_client_hello, try_get_connection_id};
use crate::session::Session;
use crate::session_store::{FindResult, SessionStore};
use crate::stats::{Counters, PacketClass, SessionSnapshot, StatsSnapshot};
use crate::utils::current_timestamp;

/// 하나의 UDP 소켓 위에 여러 DTLS 연관을 올리는 demultiplexer.
/// CID 길이는 이 Transport 인스턴스 안에서 최초로 관찰된 값으로 고정된다 —
/// 프로세스 전역이 아니라 인스턴스 단위로 latch한다(spec §9에서 허용하는 완화).
pub struct Transport<P: DtlsServerProtocol, H: RequestHandler> {
    config: Config,
    protocol: P,
    handler: Arc<H>,
    socket: Arc<UdpSocket>,
    store: Arc<SessionStore<P::Record>>,
    stats: Arc<Counters>,
    cid_len: AtomicUsize,
    outbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    shutdown: Notify,
}

const CID_LEN_UNSET: usize = usize::MAX;

impl<P, H> Transport<P, H>
where
    P: DtlsServerProtocol,
    H: RequestHandler,
{
    pub async fn bind(config: Config, protocol: P, handler: H) -> GatewayResult<Arc<Self>> {
        let socket = bind_dual_stack(config.bind_addr)?;
        info!(addr = %config.bind_addr, "transport bound");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            config,
            protocol,
            handler: Arc::new(handler),
            socket: Arc::new(socket),
            store: Arc::new(SessionStore::new()),
            stats: Arc::new(Counters::default()),
            cid_len: AtomicUsize::new(CID_LEN_UNSET),
            outbound_tx,
            shutdown: Notify::new(),
        });

        tokio::spawn(Arc::clone(&transport).run_outbound(outbound_rx));
        tokio::spawn(Arc::clone(&transport).run_inbound());
        tokio::spawn(Arc::clone(&transport).run_reaper());

        Ok(transport)
    }

    /// 들어오는 모든 세션에 공통된 바인드 엔드포인트.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let sessions = self
            .store
            .get_sessions()
            .into_iter()
            .map(|session| SessionSnapshot {
                endpoint: session.current_endpoint(),
                connection_info: session.connection_info(),
                session_start_time: session.session_start_time(),
                last_received_time: session.last_received_time(),
                has_connection_id: session.connection_id().is_some(),
            })
            .collect();
        StatsSnapshot {
            sessions,
            counters: self.stats.snapshot(),
        }
    }

    /// 송신 큐를 드레인할 시간을 준 뒤 모든 세션을 닫고 소켓을 내린다 (spec §5).
    pub async fn unbind(&self) {
        self.shutdown.notify_waiters();
        tokio::time::sleep(self.config.unbind_drain_period).await;
        for session in self.store.get_sessions() {
            session.close(true).await;
        }
    }

    fn observed_cid_len(&self) -> Option<usize> {
        match self.cid_len.load(Ordering::Acquire) {
            CID_LEN_UNSET => None,
            len => Some(len),
        }
    }

    fn latch_cid_len(&self, len: usize) {
        let _ = self
            .cid_len
            .compare_exchange(CID_LEN_UNSET, len, Ordering::AcqRel, Ordering::Acquire);
    }

    async fn run_outbound(
        self: Arc<Self>,
        mut outbound_rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    ) {
        while let Some((bytes, addr)) = outbound_rx.recv().await {
            match self.socket.send_to(&bytes, addr).await {
                Ok(_) => self.stats.record_sent(),
                Err(e) => warn!(error = %e, %addr, "outbound send failed"),
            }
        }
    }

    async fn run_inbound(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.network_mtu];
        loop {
            let (n, source) = tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("inbound loop stopping, shutdown requested");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok(v) => v,
                        // Windows reports a prior send's ICMP port-unreachable as
                        // ConnectionReset on the next recvfrom; the offending flow
                        // is identified later by its absence of keep-alives and reaped.
                        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                            debug!("inbound recv: icmp port-unreachable, continuing");
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "inbound recv failed");
                            continue;
                        }
                    }
                }
            };
            self.classify_and_dispatch(&buf[..n], source);
        }
    }

    /// spec §4.5 classification: a single `try_find` call resolves the
    /// ordered lookup rules (spec §4.4); the returned variant — not whether
    /// the input happened to carry a CID — decides which "found" counter is
    /// recorded, since rule 3 can answer a CID-bearing lookup with a session
    /// that was only ever found by endpoint.
    fn classify_and_dispatch(self: &Arc<Self>, payload: &[u8], source: SocketAddr) {
        let cid = self
            .observed_cid_len()
            .and_then(|cid_len| try_get_connection_id(payload, cid_len));

        match self.store.try_find(source, cid) {
            FindResult::FoundByConnectionId(session) => {
                session.enqueue_datagram(payload.to_vec(), source);
                self.stats.record_packet(PacketClass::ByConnectionId);
            }
            FindResult::FoundByEndpoint(session) => {
                session.enqueue_datagram(payload.to_vec(), source);
                self.stats.record_packet(PacketClass::ByEndpoint);
            }
            FindResult::NotFound if cid.is_some() => {
                self.stats.record_packet(PacketClass::UnknownCid);
                trace!(%source, "dropping datagram with unrecognized connection id");
            }
            FindResult::NotFound if may_be_client_hello(payload) => {
                self.stats.record_packet(PacketClass::NewSession);
                self.spawn_handler(source, payload.to_vec());
            }
            FindResult::NotFound => {
                self.stats.record_packet(PacketClass::Invalid);
                trace!(%source, "dropping unclassifiable datagram");
            }
        }
    }

    fn spawn_handler(self: &Arc<Self>, source: SocketAddr, first_datagram: Vec<u8>) {
        if self.store.get_count() >= self.config.max_simultaneous_handshakes {
            warn!(%source, "rejecting new handshake: at capacity");
            return;
        }

        let endpoint = EndpointState::new(source);
        let outbound_tx = self.outbound_tx.clone();
        let transport = QueueTransport::new(
            Arc::clone(&endpoint),
            self.config.receive_limit(),
            self.config.send_limit(),
            Arc::new(move |bytes, addr| {
                let _ = outbound_tx.send((bytes, addr));
            }),
        );

        let session = Session::new(Arc::clone(&transport));
        session.enqueue_datagram(first_datagram, source);

        if let Err(e) = self.store.add(source, Arc::clone(&session)) {
            warn!(%source, error = %e, "could not register new session");
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_session(source, session).await;
        });
    }

    async fn run_session(self: Arc<Self>, initial_endpoint: SocketAddr, session: Arc<Session<P::Record>>) {
        let accept_result = tokio::time::timeout(
            self.config.handshake_timeout,
            session.accept(&self.protocol),
        )
        .await;

        let accept_result = match accept_result {
            Ok(r) => r,
            Err(_elapsed) => Err(SessionFault::Cancelled),
        };

        match accept_result {
            Ok(()) => {
                if let Some(cid) = session.connection_id() {
                    if let Some(expected) = self.observed_cid_len() {
                        if cid.len() != expected {
                            warn!(
                                endpoint = %initial_endpoint,
                                expected,
                                got = cid.len(),
                                "CIDs must have constant length, rejecting handshake"
                            );
                            self.stats
                                .record_handshake(crate::error::HandshakeOutcome::OtherError);
                            self.store.remove(&session);
                            session.close(false).await;
                            return;
                        }
                    } else {
                        self.latch_cid_len(cid.len());
                    }
                }
                self.stats
                    .record_handshake(crate::error::HandshakeOutcome::Success);
                if let Err(e) = self
                    .store
                    .notify_session_accepted(initial_endpoint, Arc::clone(&session))
                {
                    warn!(error = %e, "could not promote session to established");
                    self.store.remove(&session);
                    session.close(false).await;
                    return;
                }
            }
            Err(fault) => {
                debug!(endpoint = %initial_endpoint, %fault, "handshake failed");
                self.record_fault(&fault);
                self.store.remove(&session);
                session.close(false).await;
                return;
            }
        }

        self.serve_established(session.clone()).await;
        self.store.remove(&session);
        session.close(true).await;
    }

    async fn serve_established(&self, session: Arc<Session<P::Record>>) {
        let mut buf = vec![0u8; self.config.receive_limit()];
        loop {
            match session
                .receive(&mut buf, crate::config::SESSION_RECEIVE_POLL)
                .await
            {
                Ok(n) => {
                    if let Some(response) = self
                        .handler
                        .handle_request(&session.connection_info(), &buf[..n])
                        .await
                    {
                        if let Err(fault) = session.send(&response).await {
                            debug!(%fault, "send failed, closing session");
                            return;
                        }
                    }
                }
                Err(SessionFault::Handshake(outcome, _))
                    if outcome == crate::error::HandshakeOutcome::TlsTimeout =>
                {
                    // 폴링 타임아웃 — 세션이 아직 살아있는지 reaper가 판단한다.
                    continue;
                }
                Err(fault) => {
                    debug!(%fault, "session ended");
                    return;
                }
            }
        }
    }

    fn record_fault(&self, fault: &SessionFault) {
        use crate::error::HandshakeOutcome::*;
        match fault {
            SessionFault::Handshake(outcome, _) => self.stats.record_handshake(*outcome),
            SessionFault::PeerClosed | SessionFault::Cancelled => {
                self.stats.record_handshake(TlsTimeout)
            }
            SessionFault::FatalAlert(_) => self.stats.record_handshake(TlsError),
        }
    }

    async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reaper_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = ticker.tick() => {}
            }

            let now = current_timestamp();
            for session in self.store.get_sessions() {
                let has_cid = session.connection_id().is_some();
                let timeout = if has_cid {
                    self.config.session_timeout_with_cid
                } else {
                    self.config.session_timeout
                };
                if is_idle(session.last_received_time(), now, timeout) {
                    info!(endpoint = %session.current_endpoint(), "reaping idle session");
                    self.store.remove(&session);
                    // CID 세션은 alert를 보내지 않는다 — 그 IP/port는 이미
                    // 다른 쪽이 재사용 중일 수 있다 (spec §4.5).
                    session.close(!has_cid).await;
                }
            }
        }
    }
}

/// Binds the listening socket per spec §4.5's bind contract: an IPv6 address
/// binds dual-stack (so IPv4-mapped clients reach it too) rather than
/// whatever `IPV6_V6ONLY` default the OS happens to ship. `UdpSocket::bind`
/// alone hands us no hook to clear that flag, so the socket is built and
/// configured with `socket2` first, then handed off to tokio.
fn bind_dual_stack(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Idle-session predicate, pulled out of the loop body so it can be
/// exercised directly with synthetic timestamps rather than a real clock.
fn is_idle(last_received_time: u64, now: u64, timeout: std::time::Duration) -> bool {
    now.saturating_sub(last_received_time) >= timeout.as_millis() as u64
}
