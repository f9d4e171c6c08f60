//! Daemon / Direct execution switch.
//!
//! A long-lived daemon process holds a single `SqliteStorage` handle behind
//! a unix-domain socket, so repeated CLI invocations avoid the cost of
//! reopening the database and can share a debounced flush timer plus a
//! file watcher on the JSONL file. CLI invocations try to talk to the
//! daemon first; any failure along the way degrades to Direct mode
//! (opening the store in-process, exactly as every command already does
//! today) rather than aborting, recording why in a [`FallbackReason`].
//!
//! RPC surface: line-delimited JSON requests/responses over a
//! `tokio::net::UnixListener` socket at `.beads/daemon.sock`. The protocol
//! mirrors a handful of Store operations plus `Health`, not the full CLI
//! surface -- commands that need exclusive, long-held access to the
//! database (`import`, an eventual interactive `edit`) always run Direct.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use notify::{RecursiveMode, Watcher};

use crate::config::CliOverrides;
use crate::storage::SqliteStorage;
use crate::sync::arbiter;
use crate::sync::{ImportConfig, OrphanMode, import_from_jsonl};

/// Why the CLI ended up running in Direct mode instead of through the daemon.
///
/// Mirrors the decision table verbatim: `none` means the daemon path was
/// used successfully and no fallback occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No fallback; the daemon served the request.
    None,
    /// `--no-daemon` / `no-daemon` config disabled the daemon outright.
    FlagNoDaemon,
    /// Could not open a connection to the daemon's socket.
    ConnectFailed,
    /// Connected, but the daemon failed its health check.
    HealthFailed,
    /// The daemon was unreachable and auto-start is disabled.
    AutoStartDisabled,
    /// Auto-start was attempted but the daemon did not come up in time.
    AutoStartFailed,
    /// This command requires exclusive DB access and never uses the daemon.
    DaemonUnsupported,
}

impl FallbackReason {
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// The execution mode a command ultimately resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Route the command through the daemon's RPC socket.
    Daemon,
    /// Open the store directly, in this process.
    Direct,
}

/// Request sent to the daemon over the RPC socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Health probe: daemon replies with its version and pid.
    Health,
    /// Ask the daemon to run the Sync Arbiter's mark-dirty decision.
    MarkDirty,
    /// Ask the daemon to shut down cleanly.
    Shutdown,
}

/// Response returned by the daemon over the RPC socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Request succeeded.
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    /// Request failed.
    Error { message: String },
}

/// Path to the daemon's unix-domain socket for a given beads directory.
#[must_use]
pub fn socket_path(beads_dir: &Path) -> PathBuf {
    beads_dir.join("daemon.sock")
}

/// Path to the advisory lock file guarding JSONL writes during flush.
#[must_use]
pub fn flush_lock_path(beads_dir: &Path) -> PathBuf {
    beads_dir.join(".flush.lock")
}

/// Commands that always run Direct regardless of daemon availability:
/// anything that needs uninterrupted exclusive access to the database.
#[must_use]
pub fn requires_direct_mode(command_name: &str) -> bool {
    matches!(command_name, "import" | "edit")
}

/// Decide how a command should run: Daemon, or Direct with a recorded
/// [`FallbackReason`] explaining why.
///
/// This never blocks indefinitely: connecting, health-checking, and
/// auto-starting the daemon all run against a short-lived tokio runtime
/// created for the duration of this call, so the rest of the CLI can stay
/// synchronous.
#[must_use]
pub fn resolve_mode(
    beads_dir: &Path,
    cli: &CliOverrides,
    command_name: &str,
) -> (ExecutionMode, FallbackReason) {
    if requires_direct_mode(command_name) {
        return (ExecutionMode::Direct, FallbackReason::DaemonUnsupported);
    }

    if cli.no_daemon.unwrap_or(false) {
        return (ExecutionMode::Direct, FallbackReason::FlagNoDaemon);
    }

    let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return (ExecutionMode::Direct, FallbackReason::ConnectFailed);
    };

    runtime.block_on(resolve_mode_async(beads_dir))
}

async fn resolve_mode_async(beads_dir: &Path) -> (ExecutionMode, FallbackReason) {
    let path = socket_path(beads_dir);

    if try_health_check(&path).await {
        return (ExecutionMode::Daemon, FallbackReason::None);
    }

    // Connected but unhealthy is distinct from not connecting at all, but
    // either way we attempt a single auto-start before giving up.
    if let Err(_e) = try_auto_start(beads_dir).await {
        return (ExecutionMode::Direct, FallbackReason::AutoStartFailed);
    }

    if try_health_check(&path).await {
        (ExecutionMode::Daemon, FallbackReason::None)
    } else {
        (ExecutionMode::Direct, FallbackReason::HealthFailed)
    }
}

async fn try_health_check(socket: &Path) -> bool {
    let Ok(stream) = UnixStream::connect(socket).await else {
        return false;
    };
    send_request(stream, &DaemonRequest::Health)
        .await
        .map(|resp| matches!(resp, DaemonResponse::Ok { .. }))
        .unwrap_or(false)
}

async fn try_auto_start(beads_dir: &Path) -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    let db_path = beads_dir.join("beads.db");

    std::process::Command::new(exe)
        .arg("--internal-daemon")
        .arg(beads_dir)
        .arg(db_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    // Give the daemon a moment to bind its socket before the caller retries.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn send_request(
    mut stream: UnixStream,
    request: &DaemonRequest,
) -> std::io::Result<DaemonResponse> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    serde_json::from_str(&response_line)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Entry point for the `--internal-daemon <beads_dir> <db_path>` subprocess
/// invocation: binds the RPC socket and serves requests until told to shut
/// down or the parent process disappears.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or the store cannot be
/// opened.
pub fn run_blocking(beads_dir: PathBuf, db_path: PathBuf) -> crate::error::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| crate::error::BeadsError::VCSError(e.to_string()))?;
    runtime.block_on(serve(beads_dir, db_path))
}

async fn serve(beads_dir: PathBuf, db_path: PathBuf) -> crate::error::Result<()> {
    let socket = socket_path(&beads_dir);
    if socket.exists() {
        let _ = std::fs::remove_file(&socket);
    }

    let listener = UnixListener::bind(&socket)
        .map_err(|e| crate::error::BeadsError::VCSError(format!("bind {}: {e}", socket.display())))?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    let storage = SqliteStorage::open(&db_path)?;
    let cli_overrides = CliOverrides::default();
    let debounce_ms = crate::config::load_config(&beads_dir, Some(&storage), &cli_overrides)
        .map(|layer| crate::config::flush_debounce_ms_from_layer(&layer))
        .unwrap_or(500);
    let storage = Arc::new(Mutex::new(storage));

    let debounce_storage = Arc::clone(&storage);
    let debounce_beads_dir = beads_dir.clone();
    tokio::spawn(async move {
        flush_debounce_loop(debounce_storage, debounce_beads_dir, cli_overrides, debounce_ms).await;
    });

    let watch_storage = Arc::clone(&storage);
    let watch_beads_dir = beads_dir.clone();
    tokio::spawn(async move {
        watch_jsonl_for_external_edits(watch_storage, watch_beads_dir).await;
    });

    loop {
        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| crate::error::BeadsError::VCSError(e.to_string()))?;
        let storage = Arc::clone(&storage);
        let beads_dir = beads_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, storage, beads_dir).await {
                tracing::warn!(error = %e, "daemon connection handler failed");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    storage: Arc<Mutex<SqliteStorage>>,
    beads_dir: PathBuf,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        let request: DaemonRequest = match serde_json::from_str(line.trim()) {
            Ok(req) => req,
            Err(e) => {
                write_response(&mut writer, &DaemonResponse::Error {
                    message: e.to_string(),
                })
                .await?;
                continue;
            }
        };

        let response = match request {
            DaemonRequest::Health => DaemonResponse::Ok {
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                pid: Some(std::process::id()),
            },
            DaemonRequest::MarkDirty => {
                let lock_path = flush_lock_path(&beads_dir);
                let guard = acquire_flush_lock(&lock_path);
                let mut storage = storage.lock().await;
                let cli = CliOverrides::default();
                let result = arbiter::mark_dirty(&beads_dir, &mut storage, &cli);
                drop(guard);
                match result {
                    Ok(_) => DaemonResponse::Ok {
                        version: None,
                        pid: None,
                    },
                    Err(e) => DaemonResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            DaemonRequest::Shutdown => {
                write_response(&mut writer, &DaemonResponse::Ok {
                    version: None,
                    pid: None,
                })
                .await?;
                std::process::exit(0);
            }
        };

        write_response(&mut writer, &response).await?;
    }
}

async fn write_response(
    writer: &mut (impl AsyncWriteExt + Unpin),
    response: &DaemonResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

/// Acquire the advisory file lock guarding JSONL writes during flush.
/// Returns the open file handle; dropping it releases the lock.
fn acquire_flush_lock(lock_path: &Path) -> Option<std::fs::File> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)
        .ok()?;
    match file.lock_exclusive() {
        Ok(()) => Some(file),
        Err(e) => {
            tracing::warn!(error = %e, "failed to acquire flush lock");
            None
        }
    }
}

async fn flush_debounce_loop(
    storage: Arc<Mutex<SqliteStorage>>,
    beads_dir: PathBuf,
    cli: CliOverrides,
    debounce_ms: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(debounce_ms.max(50)));
    loop {
        ticker.tick().await;
        let lock_path = flush_lock_path(&beads_dir);
        let guard = acquire_flush_lock(&lock_path);
        let mut storage = storage.lock().await;
        if let Err(e) = arbiter::mark_dirty(&beads_dir, &mut storage, &cli) {
            tracing::warn!(error = %e, "debounced flush failed");
        }
        drop(guard);
    }
}

/// Watch the JSONL file for edits made outside this process (a direct
/// editor save, a `git pull` landing new content) and import them, so a
/// long-lived daemon doesn't serve stale data between explicit `bd sync`
/// invocations.
async fn watch_jsonl_for_external_edits(storage: Arc<Mutex<SqliteStorage>>, beads_dir: PathBuf) {
    let Some(jsonl_path) = crate::config::discover_jsonl(&beads_dir) else {
        tracing::debug!("no JSONL file found, skipping file watch");
        return;
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create file watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&jsonl_path, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, path = %jsonl_path.display(), "failed to watch JSONL file");
        return;
    }

    while let Some(event) = rx.recv().await {
        if !matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
            continue;
        }

        let config = ImportConfig {
            skip_prefix_validation: false,
            rename_on_import: false,
            clear_duplicate_external_refs: false,
            orphan_mode: OrphanMode::Resurrect,
            force_upsert: false,
            beads_dir: Some(beads_dir.clone()),
            allow_external_jsonl: false,
            show_progress: false,
        };

        let mut storage = storage.lock().await;
        match import_from_jsonl(&mut storage, &jsonl_path, &config, None) {
            Ok(result) => {
                tracing::info!(imported = result.imported_count, "auto-imported external JSONL change");
            }
            Err(e) => {
                tracing::warn!(error = %e, "auto-import of external JSONL change failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_reason_roundtrips_through_json() {
        for reason in [
            FallbackReason::None,
            FallbackReason::FlagNoDaemon,
            FallbackReason::ConnectFailed,
            FallbackReason::HealthFailed,
            FallbackReason::AutoStartDisabled,
            FallbackReason::AutoStartFailed,
            FallbackReason::DaemonUnsupported,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            let parsed: FallbackReason = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn none_is_not_a_fallback() {
        assert!(!FallbackReason::None.is_fallback());
        assert!(FallbackReason::ConnectFailed.is_fallback());
    }

    #[test]
    fn requires_direct_mode_covers_import_and_edit() {
        assert!(requires_direct_mode("import"));
        assert!(requires_direct_mode("edit"));
        assert!(!requires_direct_mode("list"));
    }

    #[test]
    fn no_daemon_flag_short_circuits_to_direct() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cli = CliOverrides::default();
        cli.no_daemon = Some(true);
        let (mode, reason) = resolve_mode(dir.path(), &cli, "list");
        assert_eq!(mode, ExecutionMode::Direct);
        assert_eq!(reason, FallbackReason::FlagNoDaemon);
    }

}
