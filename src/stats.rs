// author: kodeholic (powered by Claude)
// 운영 통계 — spec §6 Statistics. 카운터는 원자적으로 누적되고, admin HTTP
// 표면(`admin.rs`)이 이를 JSON 스냅샷으로 직렬화한다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::dtls_provider::ConnectionInfo;
use crate::error::HandshakeOutcome;

/// 수신 패킷이 분류된 방식 — 어떤 색인으로 세션을 찾았는지, 혹은 왜 못 찾았는지.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketClass {
    ByEndpoint,
    ByConnectionId,
    NewSession,
    UnknownCid,
    Invalid,
}

impl PacketClass {
    fn label(self) -> &'static str {
        match self {
            PacketClass::ByEndpoint => "by_endpoint",
            PacketClass::ByConnectionId => "by_connection_id",
            PacketClass::NewSession => "new_session",
            PacketClass::UnknownCid => "unknown_cid",
            PacketClass::Invalid => "invalid",
        }
    }
}

fn handshake_label(outcome: HandshakeOutcome) -> &'static str {
    match outcome {
        HandshakeOutcome::Success => "success",
        HandshakeOutcome::TlsTimeout => "timed_out",
        HandshakeOutcome::TlsError => "tls_error",
        HandshakeOutcome::OtherError => "error",
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    handshakes_success: AtomicU64,
    handshakes_timed_out: AtomicU64,
    handshakes_tls_error: AtomicU64,
    handshakes_error: AtomicU64,
    packets_by_endpoint: AtomicU64,
    packets_by_cid: AtomicU64,
    packets_new_session: AtomicU64,
    packets_unknown_cid: AtomicU64,
    packets_invalid: AtomicU64,
    packets_sent: AtomicU64,
}

impl Counters {
    pub fn record_handshake(&self, outcome: HandshakeOutcome) {
        let counter = match outcome {
            HandshakeOutcome::Success => &self.handshakes_success,
            HandshakeOutcome::TlsTimeout => &self.handshakes_timed_out,
            HandshakeOutcome::TlsError => &self.handshakes_tls_error,
            HandshakeOutcome::OtherError => &self.handshakes_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet(&self, class: PacketClass) {
        let counter = match class {
            PacketClass::ByEndpoint => &self.packets_by_endpoint,
            PacketClass::ByConnectionId => &self.packets_by_cid,
            PacketClass::NewSession => &self.packets_new_session,
            PacketClass::UnknownCid => &self.packets_unknown_cid,
            PacketClass::Invalid => &self.packets_invalid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let mut handshakes_by_result = HashMap::new();
        handshakes_by_result.insert(
            handshake_label(HandshakeOutcome::Success).to_owned(),
            self.handshakes_success.load(Ordering::Relaxed),
        );
        handshakes_by_result.insert(
            handshake_label(HandshakeOutcome::TlsTimeout).to_owned(),
            self.handshakes_timed_out.load(Ordering::Relaxed),
        );
        handshakes_by_result.insert(
            handshake_label(HandshakeOutcome::TlsError).to_owned(),
            self.handshakes_tls_error.load(Ordering::Relaxed),
        );
        handshakes_by_result.insert(
            handshake_label(HandshakeOutcome::OtherError).to_owned(),
            self.handshakes_error.load(Ordering::Relaxed),
        );

        let mut packets_received_by_type = HashMap::new();
        for class in [
            PacketClass::ByEndpoint,
            PacketClass::ByConnectionId,
            PacketClass::NewSession,
            PacketClass::UnknownCid,
            PacketClass::Invalid,
        ] {
            let value = match class {
                PacketClass::ByEndpoint => self.packets_by_endpoint.load(Ordering::Relaxed),
                PacketClass::ByConnectionId => self.packets_by_cid.load(Ordering::Relaxed),
                PacketClass::NewSession => self.packets_new_session.load(Ordering::Relaxed),
                PacketClass::UnknownCid => self.packets_unknown_cid.load(Ordering::Relaxed),
                PacketClass::Invalid => self.packets_invalid.load(Ordering::Relaxed),
            };
            packets_received_by_type.insert(class.label().to_owned(), value);
        }

        CountersSnapshot {
            handshakes_by_result,
            packets_received_by_type,
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub handshakes_by_result: HashMap<String, u64>,
    pub packets_received_by_type: HashMap<String, u64>,
    pub packets_sent: u64,
}

/// 세션 하나를 찍은 스냅샷 — admin 표면에서 목록으로 보여준다 (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub endpoint: SocketAddr,
    pub connection_info: ConnectionInfo,
    pub session_start_time: u64,
    pub last_received_time: u64,
    pub has_connection_id: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub counters: CountersSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let counters = Counters::default();
        counters.record_handshake(HandshakeOutcome::Success);
        counters.record_handshake(HandshakeOutcome::TlsTimeout);
        counters.record_packet(PacketClass::NewSession);
        counters.record_packet(PacketClass::UnknownCid);
        counters.record_sent();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.handshakes_by_result["success"], 1);
        assert_eq!(snapshot.handshakes_by_result["timed_out"], 1);
        assert_eq!(snapshot.packets_received_by_type["new_session"], 1);
        assert_eq!(snapshot.packets_received_by_type["unknown_cid"], 1);
        assert_eq!(snapshot.packets_sent, 1);
    }
}
