// author: kodeholic (powered by Claude)

use clap::Parser;
use std::sync::Arc;

use dtls_coap_gateway::coap::EchoHandler;
use dtls_coap_gateway::config::Config;
use dtls_coap_gateway::dtls_provider::webrtc::WebrtcDtlsServerProtocol;
use dtls_coap_gateway::{run_gateway, ServerArgs};

/// dtls-coap-gateway — DTLS-over-UDP demultiplexer fronting a CoAP handler
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// UDP 바인드 포트
    #[arg(long, default_value_t = dtls_coap_gateway::config::DEFAULT_BIND_PORT)]
    pub port: u16,

    /// admin 통계 HTTP 표면 바인드 주소 (생략 시 비활성화)
    #[arg(long)]
    pub admin_addr: Option<std::net::SocketAddr>,

    /// PSK identity hint — 클라이언트에 노출되는 힌트 문자열
    #[arg(long, default_value = "dtls-coap-gateway")]
    pub psk_identity_hint: String,

    /// 데모/테스트용 PSK — 운영 배포에서는 실제 키 저장소로 교체해야 한다
    #[arg(long, env = "GATEWAY_PSK", default_value = "00112233445566778899aabbccddeeff")]
    pub psk_hex: String,
}

#[tokio::main]
async fn main() {
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let psk_key = match hex_decode(&args.psk_hex) {
        Ok(key) => key,
        Err(e) => {
            tracing::error!(error = %e, "invalid --psk-hex value");
            std::process::exit(1);
        }
    };

    let expected_hint = args.psk_identity_hint.clone().into_bytes();
    let protocol = WebrtcDtlsServerProtocol::with_psk(
        expected_hint.clone(),
        Arc::new(move |hint: &[u8]| {
            if hint == expected_hint.as_slice() {
                Ok(psk_key.clone())
            } else {
                Err(format!(
                    "unknown psk identity hint: {}",
                    String::from_utf8_lossy(hint)
                ))
            }
        }),
    );

    let mut config = Config::default();
    config.bind_addr = std::net::SocketAddr::new(
        std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        args.port,
    );

    let server_args = ServerArgs {
        config,
        admin_addr: args.admin_addr,
    };

    if let Err(e) = run_gateway(server_args, protocol, EchoHandler).await {
        tracing::error!(error = %e, "gateway exited with error");
        std::process::exit(1);
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("hex string must have even length".to_owned());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}
