// author: kodeholic (powered by Claude)
// 운영 통계 조회용 REST 표면. 원래 팀의 http.rs/admin 엔드포인트와 같은 결 —
// 단일 GET 엔드포인트가 axum state에서 스냅샷을 꺼내 JSON으로 돌려준다.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;

use crate::coap::RequestHandler;
use crate::dtls_provider::DtlsServerProtocol;
use crate::stats::StatsSnapshot;
use crate::transport::Transport;

pub struct AdminState<P: DtlsServerProtocol, H: RequestHandler> {
    transport: Arc<Transport<P, H>>,
}

// 수동 구현: derive(Clone)은 P/H 자체에 Clone을 요구해 버리는데, 여기선
// Arc만 복제하면 된다.
impl<P: DtlsServerProtocol, H: RequestHandler> Clone for AdminState<P, H> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<P: DtlsServerProtocol, H: RequestHandler> AdminState<P, H> {
    pub fn new(transport: Arc<Transport<P, H>>) -> Self {
        Self { transport }
    }
}

pub fn router<P, H>(state: AdminState<P, H>) -> Router
where
    P: DtlsServerProtocol,
    H: RequestHandler,
{
    Router::new()
        .route("/stats", get(get_stats::<P, H>))
        .with_state(state)
}

async fn get_stats<P, H>(State(state): State<AdminState<P, H>>) -> Json<StatsSnapshot>
where
    P: DtlsServerProtocol,
    H: RequestHandler,
{
    Json(state.transport.stats())
}
