// author: kodeholic (powered by Claude)
// dtls-gateway-admin — 운영 중인 게이트웨이의 `/stats`를 조회하는 CLI.
// 원래 팀의 lcadmin과 같은 모양: clap으로 서브커맨드를 받고, reqwest로 호출한
// 다음 tabled/colored로 사람이 읽기 좋은 표를 찍는다.

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use std::collections::HashMap;
use tabled::Tabled;

#[derive(Parser, Debug)]
#[command(author, version, about = "dtls-coap-gateway 운영 조회 CLI")]
struct Args {
    /// 게이트웨이 admin HTTP 엔드포인트 베이스 URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 현재 세션 목록과 카운터를 조회한다
    Stats,
    /// 세션 수만 조회한다
    Count,
}

#[derive(Debug, Deserialize)]
struct SessionSnapshot {
    endpoint: String,
    has_connection_id: bool,
    session_start_time: u64,
    last_received_time: u64,
}

#[derive(Debug, Deserialize)]
struct CountersSnapshot {
    handshakes_by_result: HashMap<String, u64>,
    packets_received_by_type: HashMap<String, u64>,
    packets_sent: u64,
}

#[derive(Debug, Deserialize)]
struct StatsSnapshot {
    sessions: Vec<SessionSnapshot>,
    counters: CountersSnapshot,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "endpoint")]
    endpoint: String,
    #[tabled(rename = "cid?")]
    has_cid: String,
    #[tabled(rename = "idle(ms)")]
    idle_ms: u64,
}

fn main() {
    let args = Args::parse();
    let client = reqwest::blocking::Client::new();

    match args.command {
        Command::Stats => print_stats(&client, &args.base_url),
        Command::Count => print_count(&client, &args.base_url),
    }
}

fn fetch_stats(client: &reqwest::blocking::Client, base_url: &str) -> Option<StatsSnapshot> {
    let url = format!("{}/stats", base_url);
    match client.get(&url).send() {
        Ok(resp) => match resp.json::<StatsSnapshot>() {
            Ok(stats) => Some(stats),
            Err(e) => {
                eprintln!("{} failed to parse response: {}", "error:".red().bold(), e);
                None
            }
        },
        Err(e) => {
            eprintln!("{} could not reach {}: {}", "error:".red().bold(), url, e);
            None
        }
    }
}

fn print_stats(client: &reqwest::blocking::Client, base_url: &str) {
    let Some(stats) = fetch_stats(client, base_url) else {
        std::process::exit(1);
    };

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;

    let rows: Vec<SessionRow> = stats
        .sessions
        .iter()
        .map(|s| SessionRow {
            endpoint: s.endpoint.clone(),
            has_cid: if s.has_connection_id { "yes".green().to_string() } else { "no".to_string() },
            idle_ms: now.saturating_sub(s.last_received_time),
        })
        .collect();

    println!("{}", "sessions".bold());
    println!("{}", tabled::Table::new(rows));

    println!();
    println!("{}", "handshakes".bold());
    for (result, count) in &stats.counters.handshakes_by_result {
        println!("  {:<12} {}", result, count);
    }

    println!();
    println!("{}", "packets received".bold());
    for (class, count) in &stats.counters.packets_received_by_type {
        println!("  {:<18} {}", class, count);
    }
    println!("  {:<18} {}", "sent", stats.counters.packets_sent);
}

fn print_count(client: &reqwest::blocking::Client, base_url: &str) {
    let Some(stats) = fetch_stats(client, base_url) else {
        std::process::exit(1);
    };
    println!("{}", stats.sessions.len());
}
