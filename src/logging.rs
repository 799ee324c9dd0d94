//! Tracing setup.
//!
//! Stderr output is always on, filtered by `RUST_LOG` (default `info`).
//! Setting `FLOTILLA_LOG=1` additionally appends structured lines to
//! `flotilla.log` in the platform log directory.

use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the file appender's worker alive; drop it only at process exit or
/// buffered lines are lost.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. Call once from `main` and hold the
/// returned guard in a local for the whole run.
pub fn init() -> LogGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    if std::env::var("FLOTILLA_LOG").as_deref() != Ok("1") {
        base.init();
        return LogGuard { _file_guard: None };
    }

    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);
    let appender = tracing_appender::rolling::never(dir, "flotilla.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    base.with(fmt::layer().with_writer(writer).with_ansi(false)).init();

    LogGuard {
        _file_guard: Some(guard),
    }
}

/// `$XDG_DATA_HOME/flotilla`, the per-OS equivalent under `$HOME`, or
/// `/tmp/flotilla` when neither variable is set.
fn log_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("flotilla");
    }
    let Some(home) = std::env::var_os("HOME") else {
        return PathBuf::from("/tmp/flotilla");
    };
    let home = PathBuf::from(home);
    if cfg!(target_os = "macos") {
        home.join("Library/Logs/flotilla")
    } else {
        home.join(".local/share/flotilla")
    }
}
