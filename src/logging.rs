use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

pub const LOG_FILE_ENV: &str = "PG_HEAP_LOG";
const DEFAULT_FILTER: &str = "warn,pg_heap=info,storage=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: to the file named by `PG_HEAP_LOG` when
/// set, to stderr otherwise. Safe to call more than once.
pub fn init_tracing() {
    static GUARD: OnceLock<Option<tracing_appender::non_blocking::WorkerGuard>> = OnceLock::new();
    if GUARD.get().is_some() {
        return;
    }

    let guard = match std::env::var(LOG_FILE_ENV) {
        Ok(path) if !path.is_empty() => {
            let p = Path::new(&path);
            let dir = match p.parent() {
                Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
                _ => Path::new(".").to_path_buf(),
            };
            let file = p
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "pg_heap.log".to_string());
            let _ = fs::create_dir_all(&dir);
            let (nb, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(nb)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        _ => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(true)
                .with_writer(std::io::stderr)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    };
    let _ = GUARD.set(guard);
}
