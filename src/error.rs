// author: kodeholic (powered by Claude)

use std::fmt;

/// 시스템 전체 에러 타입
#[derive(Debug)]
pub enum GatewayError {
    Io(std::io::Error),
    Provider(crate::dtls_provider::ProviderError),
    Store(crate::session_store::StoreError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Io(e) => write!(f, "I/O error: {}", e),
            GatewayError::Provider(e) => write!(f, "DTLS provider error: {}", e),
            GatewayError::Store(e) => write!(f, "session store error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(e)
    }
}

impl From<crate::dtls_provider::ProviderError> for GatewayError {
    fn from(e: crate::dtls_provider::ProviderError) -> Self {
        GatewayError::Provider(e)
    }
}

impl From<crate::session_store::StoreError> for GatewayError {
    fn from(e: crate::session_store::StoreError) -> Self {
        GatewayError::Store(e)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// 핸드셰이크 결과 분류 — 통계 카운터의 키로 쓰인다 (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Success,
    TlsTimeout,
    TlsError,
    OtherError,
}

/// 핸드셰이크/런타임 중 세션 하나가 죽는 이유. 통계에는 반영되지만
/// 다른 세션에는 영향을 주지 않는다 (spec §7 "user-visible behavior").
#[derive(Debug)]
pub enum SessionFault {
    Handshake(HandshakeOutcome, crate::dtls_provider::ProviderError),
    PeerClosed,
    FatalAlert(String),
    Cancelled,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::Handshake(outcome, err) => {
                write!(f, "handshake failed ({:?}): {}", outcome, err)
            }
            SessionFault::PeerClosed => write!(f, "peer closed the association"),
            SessionFault::FatalAlert(msg) => write!(f, "fatal DTLS alert: {}", msg),
            SessionFault::Cancelled => write!(f, "cancelled"),
        }
    }
}

