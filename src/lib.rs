// author: kodeholic (powered by Claude)

pub mod admin;
pub mod coap;
pub mod config;
pub mod dtls_provider;
pub mod error;
pub mod queue_transport;
pub mod record_parser;
pub mod session;
pub mod session_store;
pub mod stats;
pub mod transport;
pub mod utils;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::coap::RequestHandler;
use crate::config::Config;
use crate::dtls_provider::DtlsServerProtocol;
use crate::transport::Transport;

/// CLI에서 주입되는 런타임 설정.
pub struct ServerArgs {
    pub config: Config,
    /// admin HTTP 표면이 들을 주소 — `None`이면 admin 표면을 띄우지 않는다.
    pub admin_addr: Option<std::net::SocketAddr>,
}

/// DTLS provider와 CoAP 핸들러를 주입받아 Transport를 띄우고, 설정돼 있으면
/// admin HTTP 표면도 같이 띄운다. 프로세스가 살아있는 한 반환하지 않는다.
pub async fn run_gateway<P, H>(args: ServerArgs, protocol: P, handler: H) -> crate::error::GatewayResult<()>
where
    P: DtlsServerProtocol,
    H: RequestHandler,
{
    let bind_addr = args.config.bind_addr;
    let transport = Transport::bind(args.config, protocol, handler).await?;
    info!(addr = %bind_addr, "dtls-coap-gateway transport up");

    if let Some(admin_addr) = args.admin_addr {
        let admin_state = admin::AdminState::new(Arc::clone(&transport));
        let app = admin::router(admin_state);
        match TcpListener::bind(admin_addr).await {
            Ok(listener) => {
                info!(addr = %admin_addr, "admin http surface up");
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "admin http surface exited");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, addr = %admin_addr, "failed to bind admin http surface");
            }
        }
    }

    // transport가 백그라운드 태스크로 동작하므로, 프로세스가 살아있는 동안은
    // 여기서 그냥 대기한다.
    std::future::pending::<()>().await;
    Ok(())
}
