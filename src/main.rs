//! point_ledger host adapter
//!
//! Drives a [`PointLedger`] from line-oriented input on stdin, one event or
//! operator command per line:
//!
//! ```text
//! cmd <player> <raw command text>    e.g. cmd Alice /p pay Bob 10
//! bal <player> <delta>               e.g. bal Bob 10
//! lookup <identity> [page]
//! status
//! reload
//! quit
//! ```
//!
//! `<player>` is a display name, or `@<uuid>` for a player whose name is
//! unknown. Named players get a stable UUID derived from the lowercased
//! name. EOF or Ctrl-C stops the ledger after flushing everything queued.

use anyhow::Context;
use point_ledger::{AppConfig, ConfigSource, LedgerError, NotificationSink, PlayerRef, PointLedger};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn config_path(env: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("config/{}.yaml", env))
}

// ============================================================
// INPUT PARSING
// ============================================================

fn parse_player(token: &str) -> Option<PlayerRef> {
    match token.strip_prefix('@') {
        Some(raw) => Uuid::parse_str(raw).ok().map(PlayerRef::anonymous),
        None => {
            let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, token.to_lowercase().as_bytes());
            Some(PlayerRef::new(token, uuid))
        }
    }
}

/// Returns false when the adapter should stop
async fn handle_line(ledger: &PointLedger, env: &str, line: &str) -> bool {
    let line = line.trim();
    let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match op {
        "" => {}
        "cmd" => {
            let (who, text) = rest.split_once(' ').unwrap_or((rest, ""));
            match parse_player(who) {
                Some(issuer) => ledger.on_command_observed(text, &issuer),
                None => eprintln!("usage: cmd <player> <text>"),
            }
        }
        "bal" => {
            let mut parts = rest.split_whitespace();
            let player = parts.next().and_then(parse_player);
            let delta = parts.next().and_then(|d| d.parse::<i32>().ok());
            match (player, delta) {
                (Some(player), Some(delta)) => ledger.on_balance_changed(&player, delta),
                _ => eprintln!("usage: bal <player> <delta>"),
            }
        }
        "lookup" => {
            let mut parts = rest.split_whitespace();
            let Some(identity) = parts.next() else {
                eprintln!("usage: lookup <identity> [page]");
                return true;
            };
            let page = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
            print_lookup(ledger, identity, page).await;
        }
        "status" => {
            let status = ledger.status();
            println!("{}", status);
            println!("{}", status.pipeline);
        }
        "reload" => {
            let result = ledger
                .request_reload(ConfigSource::File(config_path(env)))
                .await
                .unwrap_or(Err(LedgerError::ReloadAborted));
            match result {
                Ok(()) => println!("reloaded"),
                Err(e) => println!("reload failed: {}", e),
            }
        }
        "quit" | "exit" => return false,
        other => eprintln!("unknown command: {}", other),
    }
    true
}

async fn print_lookup(ledger: &PointLedger, identity: &str, page: u32) {
    match ledger.lookup(identity, page, ledger.default_page_size()).await {
        Ok(result) if result.total_count == 0 => {
            println!("no transactions for {}", identity);
        }
        Ok(result) => {
            println!(
                "=== {} (page {}/{}, {} total) ===",
                result.identity,
                result.page,
                result.total_pages(),
                result.total_count
            );
            for tx in &result.records {
                println!(
                    "#{} {} {} -> {} : {}",
                    tx.id,
                    tx.record.timestamp().format("%Y-%m-%d %H:%M:%S"),
                    tx.record.sender(),
                    tx.record.receiver(),
                    tx.record.amount()
                );
            }
            if result.records.is_empty() {
                println!("(page out of range)");
            }
        }
        Err(e) => println!("lookup failed: {}", e),
    }
}

// ============================================================
// MAIN
// ============================================================

fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)
        .with_context(|| format!("loading {}", config_path(&env).display()))?;
    let _log_guard = point_ledger::logging::init_logging(&app_config);

    let worker_threads = app_config.runtime.worker_threads();
    tracing::info!(env = %env, worker_threads, "Starting point_ledger");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("point-ledger")
        .enable_all()
        .build()
        .context("building runtime")?;

    runtime.block_on(async move {
        let ledger = PointLedger::start(app_config)
            .await
            .context("starting ledger")?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !handle_line(&ledger, &env, &line).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received");
                    break;
                }
            }
        }

        let report = ledger.stop().await;
        tracing::info!(
            flushed = report.flushed_in_batches,
            written_individually = report.written_individually,
            lost = report.lost,
            "point_ledger stopped"
        );
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_player_named_is_stable() {
        let a = parse_player("Alice").unwrap();
        let b = parse_player("alice").unwrap();
        assert_eq!(a.name.as_deref(), Some("Alice"));
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn test_parse_player_anonymous() {
        let uuid = Uuid::new_v4();
        let p = parse_player(&format!("@{}", uuid)).unwrap();
        assert_eq!(p.name, None);
        assert_eq!(p.uuid, uuid);
        assert!(parse_player("@not-a-uuid").is_none());
    }
}
