// author: kodeholic (powered by Claude)
// 매직 넘버를 배제하고 시스템 전체의 성능과 한계를 제어하는 상수/설정 모음입니다.

use std::time::Duration;

/// CoAPS 기본 포트 (RFC 7252 §12.8)
pub const DEFAULT_BIND_PORT: u16 = 5684;

/// Queue Transport의 블로킹 receive 폴링 간격.
/// 0이면 DTLS provider가 이를 "즉시 반환"으로 오해해 CPU를 독점하고,
/// 너무 크면 취소 신호에 대한 응답이 늦어진다.
pub const SESSION_RECEIVE_POLL: Duration = Duration::from_millis(1);

/// IPv4 헤더 + UDP 헤더 오버헤드 (수신측 버짓 계산용)
const IPV4_UDP_OVERHEAD: usize = 20 + 8;

/// IPv4 헤더 + DTLS CID 확장을 포함한 최대 옵션 버짓 + UDP 헤더 (송신측 버짓 계산용)
const IPV4_OPTIONS_UDP_OVERHEAD: usize = 20 + 64 + 8;

/// 런타임 설정. `Config::default()`가 spec의 모든 기본값을 제공합니다.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP 소켓 바인드 주소
    pub bind_addr: std::net::SocketAddr,
    /// CID 없는 세션의 유휴 타임아웃
    pub session_timeout: Duration,
    /// CID를 가진 세션의 유휴 타임아웃
    pub session_timeout_with_cid: Duration,
    /// 동시 핸드셰이크 중인 세션 수 상한
    pub max_simultaneous_handshakes: usize,
    /// 송신 MTU 버짓 계산 기준값
    pub network_mtu: usize,
    /// 핸드셰이크 1회가 허용되는 최대 시간 — 초과 시 TlsTimeout으로 분류
    pub handshake_timeout: Duration,
    /// unbind 시 송신 큐 드레인을 기다리는 최대 시간
    pub unbind_drain_period: Duration,
    /// 좀비 세션 정리 주기 — 테스트에서 짧게 줄여 실제 10초를 기다리지
    /// 않고도 reap 동작을 구동할 수 있게 `Config` 필드로 둔다.
    pub reaper_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: std::net::SocketAddr::new(
                std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
                DEFAULT_BIND_PORT,
            ),
            session_timeout: Duration::from_secs(60 * 60),
            session_timeout_with_cid: Duration::from_secs(60 * 60),
            max_simultaneous_handshakes: 1000,
            network_mtu: 1500,
            handshake_timeout: Duration::from_secs(30),
            unbind_drain_period: Duration::from_secs(2),
            reaper_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// DTLS provider의 `receive()` 버짓 — IPv4/UDP 오버헤드를 제한 MTU에서 뺀 값
    pub fn receive_limit(&self) -> usize {
        self.network_mtu.saturating_sub(IPV4_UDP_OVERHEAD)
    }

    /// DTLS provider의 `send()` 버짓 — IP 옵션(최대 CID 확장 포함) 버짓까지 뺀 값
    pub fn send_limit(&self) -> usize {
        self.network_mtu.saturating_sub(IPV4_OPTIONS_UDP_OVERHEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_addr.port(), 5684);
        assert_eq!(cfg.session_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.session_timeout_with_cid, Duration::from_secs(3600));
        assert_eq!(cfg.max_simultaneous_handshakes, 1000);
        assert_eq!(cfg.network_mtu, 1500);
    }

    #[test]
    fn mtu_budgets_match_spec_formula() {
        let cfg = Config { network_mtu: 1500, ..Config::default() };
        assert_eq!(cfg.receive_limit(), 1500 - 28);
        assert_eq!(cfg.send_limit(), 1500 - 92);
    }
}
