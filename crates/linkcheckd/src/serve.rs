//! Serve mode — runs the REST API, the task queue, and the retention
//! sweeper in one process.
//!
//! In this mode, the daemon:
//! 1. Opens the state store
//! 2. Starts the task queue with its sub-job workers
//! 3. Makes sure a shared key exists (or pins the configured one)
//! 4. Re-dispatches sub-jobs left unfinished by a previous run
//! 5. Serves the REST API until Ctrl-C

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use async_trait::async_trait;
use linkcheck_engine::{
    Dispatcher, EngineError, EngineResult, JobService, RetentionSweeper, StoreSettings,
    SubJobWorker, TaskQueue, WorkItem,
};
use linkcheck_probe::HttpProbe;
use linkcheck_state::StateStore;

use crate::config::DaemonConfig;

const DB_FILE: &str = "linkcheck.redb";

fn open_store(config: &DaemonConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path: PathBuf = config.store.data_dir.join(DB_FILE);
    // redb holds an exclusive lock on the file while a process has it open.
    let store = StateStore::open(&db_path).with_context(|| {
        format!(
            "opening state store at {} (is another linkcheckd process using this data directory?)",
            db_path.display()
        )
    })?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Shared key for the configured store, creating one if needed.
///
/// Reads the store file directly, so it cannot run while `serve` holds the
/// same data directory unless the key is pinned in the config.
pub fn shared_key(config: &DaemonConfig) -> anyhow::Result<String> {
    if let Some(key) = &config.auth.shared_key {
        return Ok(key.clone());
    }
    let store = open_store(config).context(
        "show-key needs the state store; stop linkcheckd serve first or pin auth.shared_key in the config",
    )?;
    let service = JobService::new(store, Arc::new(NoDispatch));
    Ok(service.shared_key()?.key)
}

/// Dispatcher for one-shot commands that never create jobs.
struct NoDispatch;

#[async_trait]
impl Dispatcher for NoDispatch {
    async fn enqueue(&self, _items: &[WorkItem]) -> EngineResult<()> {
        Err(EngineError::Dispatch("no task queue in this mode".to_string()))
    }
}

pub async fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("linkcheck daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config)?;

    let probe = Arc::new(HttpProbe::new(&config.probe_config()?)?);
    let settings = Arc::new(StoreSettings::new(store.clone()));
    let worker = Arc::new(SubJobWorker::new(store.clone(), probe, settings));
    info!(
        max_calls_per_minute = ?config.probe.max_calls_per_minute,
        "sub-job worker initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let (queue, queue_handle) =
        TaskQueue::start(worker, config.queue_config()?, shutdown_rx.clone());
    let service = Arc::new(JobService::new(store, Arc::new(queue)));

    match &config.auth.shared_key {
        Some(key) => {
            service.pin_shared_key(key)?;
            info!("configured shared key pinned");
        }
        None => {
            service.shared_key()?;
        }
    }
    if config.auth.dev_mode {
        warn!("dev mode enabled, shared key is not checked");
    }

    service.resume_pending().await?;

    let sweeper = RetentionSweeper::new(service.clone(), config.retention_config()?);
    let retention_handle = tokio::spawn(sweeper.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = linkcheck_api::build_router(service, config.auth.dev_mode);
    let ip: std::net::IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = queue_handle.await;
    let _ = retention_handle.await;

    info!("linkcheck daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.store.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn shared_key_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let first = shared_key(&config).unwrap();
        assert_eq!(shared_key(&config).unwrap(), first);
    }

    #[test]
    fn pinned_shared_key_needs_no_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir.path().join("never-created"));
        config.auth.shared_key = Some("pinned".to_string());

        assert_eq!(shared_key(&config).unwrap(), "pinned");
        assert!(!config.store.data_dir.exists());
    }

    #[test]
    fn shared_key_explains_a_locked_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let _running = open_store(&config).unwrap();

        let err = shared_key(&config).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("stop linkcheckd serve"), "{message}");
        assert!(message.contains("another linkcheckd process"), "{message}");
    }
}
