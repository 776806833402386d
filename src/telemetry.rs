// =============================================================================
// Structured logging setup, crash-report file, and Hive contribution toggle
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

/// Initialize `tracing-subscriber` once at startup. JSON output on stderr —
/// never stdout, which is reserved for response envelopes.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
    .json()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

/// Whether the user has opted in to contributing resolution results back to
/// the Hive. Defaults to off; toggled by `set_hive_contribution`.
pub struct HiveContributionToggle {
    enabled: AtomicBool,
}

impl HiveContributionToggle {
    pub fn new(default_enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(default_enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Append a crash summary to the local crash-report file. Best-effort: a
/// failure to write is logged, never propagated, since we're already
/// handling an unexpected failure.
pub fn record_crash(path: &PathBuf, context: &str, error: &anyhow::Error) {
    let line = format!(
        "{} | {} | {:#}\n",
        chrono::Utc::now().to_rfc3339(),
        context,
        error
    );
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    use std::io::Write;
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()) {
                tracing::error!(error = %e, "failed to append to crash report file");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to open crash report file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_defaults_and_flips() {
        let t = HiveContributionToggle::new(false);
        assert!(!t.is_enabled());
        t.set(true);
        assert!(t.is_enabled());
    }

    #[test]
    fn record_crash_appends_a_line() {
        let path = std::env::temp_dir().join(format!("crash-{}.log", uuid::Uuid::new_v4()));
        let err = anyhow::anyhow!("boom");
        record_crash(&path, "test_context", &err);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("test_context"));
        assert!(contents.contains("boom"));
        let _ = std::fs::remove_file(&path);
    }
}
