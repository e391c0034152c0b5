// author: kodeholic (powered by Claude)
// Queue Transport — 비동기 UDP demux와 DTLS provider의 블로킹 레코드 API를
// 잇는 세션당 브리지입니다 (spec §4.2).
//
// DTLS provider 쪽에서 보면 이것은 BouncyCastle 스타일의 `IDatagramTransport`:
// `receive(buf, wait_ms)`가 블로킹 호출처럼 보이되, 내부적으로는 demux 태스크가
// 비동기로 채워주는 FIFO를 기다린다. 0을 반환하면 provider가 "길이 0 데이터그램"
// 으로 해석해 재전송/중단 로직을 건너뛰므로, 타임아웃/취소는 항상 음수로 구분한다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Duration;
use tracing::{debug, trace};

/// 타임아웃으로 인한 수신 실패
pub const RECEIVE_TIMEOUT: isize = -1;
/// `close()`로 인해 취소된 수신
pub const RECEIVE_CANCELLED: isize = -2;

/// DTLS provider가 요구하는 최소한의 전송 계약 (spec §6).
/// `QueueTransport`가 이 트레이트를 구현하고, provider 어댑터는 이것만 의존한다.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// 데이터그램 하나를 최대 `wait` 동안 기다려 수신한다.
    /// 성공 시 복사된 바이트 수(>= 0), 타임아웃/취소 시 음수 sentinel.
    /// 절대 0을 반환하지 않는다 — 길이 0 데이터그램은 실제로 발생하지 않는다.
    async fn receive(&self, buf: &mut [u8], wait: Duration) -> isize;
    async fn send(&self, buf: &[u8]) -> std::io::Result<()>;
    fn receive_limit(&self) -> usize;
    fn send_limit(&self) -> usize;
    async fn close(&self);
}

/// 세션의 현재/대기 엔드포인트를 공유 상태로 묶어, Queue Transport와 Session이
/// Arc 순환 참조 없이 같은 값을 보고 갱신할 수 있게 한다.
pub struct EndpointState {
    initial: SocketAddr,
    current: RwLock<SocketAddr>,
    pending: StdMutex<Option<SocketAddr>>,
}

impl EndpointState {
    pub fn new(initial: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            initial,
            current: RwLock::new(initial),
            pending: StdMutex::new(None),
        })
    }

    pub fn initial(&self) -> SocketAddr {
        self.initial
    }

    pub fn current(&self) -> SocketAddr {
        *self.current.read().unwrap()
    }

    pub fn pending(&self) -> Option<SocketAddr> {
        *self.pending.lock().unwrap()
    }

    /// 현재 엔드포인트와 다른 출처를 관찰했을 때 후보로 기록한다.
    /// 마이그레이션은 여기서 확정되지 않는다 — `commit_pending`을 거쳐야 한다.
    fn note_candidate(&self, addr: SocketAddr) {
        if addr != self.current() {
            *self.pending.lock().unwrap() = Some(addr);
        }
    }

    /// 마이그레이션 확정 규칙(RFC 9146 §6)이 충족되었을 때 호출된다:
    /// 새 엔드포인트에서 온 레코드가 (a) 복호화 성공, (b) epoch 순서상 최신,
    /// (c) CID로 보호되었음이 확인된 후에만 `current`로 승격한다.
    pub fn commit_pending(&self) -> Option<SocketAddr> {
        let candidate = self.pending.lock().unwrap().take()?;
        *self.current.write().unwrap() = candidate;
        Some(candidate)
    }
}

type SendCallback = Arc<dyn Fn(Vec<u8>, SocketAddr) + Send + Sync>;

pub struct QueueTransport {
    endpoint: Arc<EndpointState>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    send_callback: SendCallback,
    closed: AtomicBool,
    closed_signal: Notify,
    receive_limit: usize,
    send_limit: usize,
}

impl QueueTransport {
    /// `send_callback`은 Transport의 공유 송신 큐에 `(bytes, 현재 엔드포인트)`를
    /// 올리는 콜백이다 — 실제 소켓 쓰기는 별도의 outbound 태스크가 담당한다.
    pub fn new(
        endpoint: Arc<EndpointState>,
        receive_limit: usize,
        send_limit: usize,
        send_callback: SendCallback,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            endpoint,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            send_callback,
            closed: AtomicBool::new(false),
            closed_signal: Notify::new(),
            receive_limit,
            send_limit,
        })
    }

    pub fn closed_token(&self) -> &Notify {
        &self.closed_signal
    }

    /// 이 transport가 관찰하는 현재/대기 엔드포인트 상태. `Session`이 같은
    /// `Arc`를 공유해야 마이그레이션 커밋이 실제로 의미를 가진다.
    pub fn endpoint_state(&self) -> &Arc<EndpointState> {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// inbound demux 태스크가 호출한다. 닫혀 있으면 조용히 버린다.
    pub fn enqueue_received(&self, bytes: Vec<u8>, source_endpoint: SocketAddr) {
        if self.is_closed() {
            trace!("queue-transport: dropping datagram, transport closed");
            return;
        }
        self.endpoint.note_candidate(source_endpoint);
        if self.inbound_tx.send(bytes).is_err() {
            debug!("queue-transport: receiver gone, dropping datagram");
        }
    }
}

#[async_trait]
impl DatagramTransport for QueueTransport {
    async fn receive(&self, buf: &mut [u8], wait: Duration) -> isize {
        if self.is_closed() {
            return RECEIVE_CANCELLED;
        }

        let recv_fut = async {
            let mut rx = self.inbound_rx.lock().await;
            rx.recv().await
        };

        tokio::select! {
            biased;
            _ = self.closed_signal.notified() => RECEIVE_CANCELLED,
            datagram = recv_fut => {
                match datagram {
                    Some(data) => {
                        let len = data.len().min(buf.len());
                        buf[..len].copy_from_slice(&data[..len]);
                        len as isize
                    }
                    None => RECEIVE_CANCELLED,
                }
            }
            _ = tokio::time::sleep(wait) => RECEIVE_TIMEOUT,
        }
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        if self.is_closed() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "queue transport closed",
            ));
        }
        (self.send_callback)(buf.to_vec(), self.endpoint.current());
        Ok(())
    }

    fn receive_limit(&self) -> usize {
        self.receive_limit
    }

    fn send_limit(&self) -> usize {
        self.send_limit
    }

    async fn close(&self) {
        // idempotent: 두 번째 호출은 그냥 notify를 한 번 더 울릴 뿐이다.
        self.closed.store(true, Ordering::Release);
        self.closed_signal.notify_waiters();
    }
}
