//! Crash Round Server
//!
//! Runs the round owner and the WebSocket server until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crash_round::{
    fairness::{
        audit::{AuditStore, JsonLinesAuditStore, MemoryAuditStore},
        seed::OsSeedSource,
        verify::verify_record,
    },
    game::owner::RoundOwner,
    Clock, GameConfig, GameServer, InMemoryBalanceStore, RoundEngine, ServerConfig, TokioClock,
    VERSION,
};

fn init_tracing() {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_audit_store(config: &GameConfig) -> anyhow::Result<Arc<dyn AuditStore>> {
    match &config.audit_log {
        Some(path) => {
            let store = JsonLinesAuditStore::open(path)
                .with_context(|| format!("opening audit log {}", path.display()))?;
            info!("Audit log: {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            warn!("CRASH_AUDIT_LOG not set, audit records are kept in memory only");
            Ok(Arc::new(MemoryAuditStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let server_config = ServerConfig::from_env();
    let game_config = GameConfig::from_env();

    info!("Crash Round Server v{}", VERSION);
    info!("Bind address: {}", server_config.bind_addr);
    info!("Tick interval: {:?}", game_config.tick_interval);

    let audit = open_audit_store(&game_config)?;

    let mut engine = RoundEngine::new(game_config.engine_config(), Box::new(OsSeedSource));
    if let Some(last) = audit.last().context("reading audit log")? {
        if let Err(e) = verify_record(&last) {
            warn!("Last audited round {} does not verify: {}", last.round_id, e);
        }
        engine.resume_after(&last);
        let (round_id, nonce) = engine.next_round();
        info!("Resuming at round {} (nonce {})", round_id, nonce);
    }

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let ledger = Arc::new(InMemoryBalanceStore::new());
    let (events_tx, _) = broadcast::channel(game_config.event_capacity.max(1));

    let (handle, owner_task) = RoundOwner::spawn(
        engine,
        clock.clone(),
        ledger.clone(),
        audit,
        Arc::new(events_tx.clone()),
        game_config.owner_config(),
    );

    let server = Arc::new(GameServer::new(server_config, handle, ledger, clock, events_tx));
    let runner = server.clone();
    let server_task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
        result = server_task => {
            result.context("server task panicked")??;
        }
    }

    // Dropping the last handle stops the round owner.
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), owner_task).await;

    info!("Stopped");
    Ok(())
}
