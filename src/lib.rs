pub mod a2a;
pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod sse;

#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "capability_dispatch=info,warn";

const LOG_FILE_NAME: &str = "capdispatch.log";

/// Return the platform-standard data directory for capdispatch.
///
/// - macOS: `~/Library/Application Support/capdispatch/`
/// - Windows: `{FOLDERID_RoamingAppData}\capdispatch\`
/// - Linux: `$XDG_DATA_HOME/capdispatch/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.capdispatch/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("capdispatch");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".capdispatch")
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Write to a rotated file in [`data_dir`] instead of stderr.
    pub to_file: bool,
    /// One JSON object per line instead of human-readable text.
    pub json: bool,
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr so stdout only carries results. With `to_file`, existing
/// logs are rotated (keeping the last 3) and a fresh line-flushed log file is
/// opened; if that fails, logging stays on stderr.
pub fn init_tracing(options: LogOptions) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let log_file = if options.to_file {
        open_log_file(&data_dir())
    } else {
        None
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    match (log_file, options.json) {
        (Some((_, file)), true) => builder.json().with_writer(file).init(),
        (Some((_, file)), false) => builder.with_ansi(false).with_writer(file).init(),
        (None, true) => builder.json().with_writer(std::io::stderr).init(),
        (None, false) => builder.with_writer(std::io::stderr).init(),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path,
        pid = std::process::id(),
        "capdispatch starting"
    );
}

/// Rotate and open the log file in `dir`. `None` if the file cannot be opened.
fn open_log_file(dir: &Path) -> Option<(PathBuf, FlushingWriter)> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("cannot create log directory {}: {e}", dir.display());
        return None;
    }
    let log_path = dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, 3);

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => Some((log_path, FlushingWriter::new(file))),
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", log_path.display());
            None
        }
    }
}

/// Rotate log files: `capdispatch.log` → `.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so each
/// log line is on disk even if the process is killed.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
