// =============================================================================
// Engine configuration — built once at startup, threaded through explicitly
// =============================================================================
//
// The donor reads environment variables at import time, scattered across
// modules. We replace that with a single `Config` value constructed in
// `main()` and passed down by reference; nothing below this module touches
// `std::env` again after startup.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

/// Command-line flags. Most engine behaviour is controlled by environment
/// variables (matching the host shell's existing deployment story) but a
/// handful of developer-facing switches are more convenient as flags.
#[derive(Debug, Parser)]
#[command(name = "prism-engine", about = "Portfolio Prism headless analytics engine")]
pub struct Cli {
    /// Run the development HTTP/SSE transport instead of stdin/stdout.
    #[arg(long)]
    pub http: bool,

    /// Bind the development HTTP transport to all interfaces instead of
    /// loopback only. Requires `--http`. Logged loudly because it widens the
    /// exposure of an endpoint that is otherwise local-only.
    #[arg(long)]
    pub bind_all: bool,

    /// Port for the development HTTP transport.
    #[arg(long, default_value_t = 4317)]
    pub port: u16,
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for persisted state (`PRISM_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Shared secret for the dev HTTP/SSE transport (`PRISM_ECHO_TOKEN`).
    pub echo_token: Option<String>,
    /// Suppresses interactive prompts in adapters (`PRISM_HEADLESS`).
    pub headless: bool,
    /// Enables atomic per-phase debug snapshots (`DEBUG_PIPELINE`).
    pub debug_pipeline: bool,
    /// Use the HTTP/SSE transport rather than stdin/stdout.
    pub http_transport: bool,
    /// Bind the HTTP transport to all interfaces rather than loopback.
    pub bind_all: bool,
    pub http_port: u16,
}

impl Config {
    /// Build configuration from environment variables and parsed CLI flags.
    ///
    /// `PRISM_DATA_DIR` is required in production; when unset we fall back to
    /// a platform data directory so that `cargo run` works out of the box in
    /// development.
    pub fn load(cli: Cli) -> Result<Self> {
        let data_dir = match std::env::var("PRISM_DATA_DIR") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
            _ => dirs_next::data_local_dir()
                .context("no PRISM_DATA_DIR set and no platform data directory available")?
                .join("portfolio-prism"),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
        let data_dir = data_dir
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {}", data_dir.display()))?;

        let echo_token = std::env::var("PRISM_ECHO_TOKEN").ok().filter(|s| !s.is_empty());
        let headless = std::env::var("PRISM_HEADLESS").is_ok();
        let debug_pipeline = std::env::var("DEBUG_PIPELINE").is_ok();

        if cli.http && echo_token.is_none() {
            bail!("--http requires PRISM_ECHO_TOKEN to be set (dev-only transport, no default in production)");
        }

        Ok(Self {
            data_dir,
            echo_token,
            headless,
            debug_pipeline,
            http_transport: cli.http,
            bind_all: cli.bind_all,
            http_port: cli.port,
        })
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn health_report_path(&self) -> PathBuf {
        self.outputs_dir().join("pipeline_health.json")
    }

    pub fn breakdown_report_path(&self) -> PathBuf {
        self.outputs_dir().join("holdings_breakdown.csv")
    }

    pub fn dashboard_report_path(&self) -> PathBuf {
        self.outputs_dir().join("dashboard.json")
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.data_dir.join("tr_cookies.txt")
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("prism_state.sqlite3")
    }

    /// Verify that `candidate` resolves to a path under `self.data_dir`,
    /// preventing directory traversal through a crafted path or symlink.
    /// The candidate need not exist yet — only its parent must.
    pub fn require_within_data_dir(&self, candidate: &Path) -> Result<PathBuf> {
        let parent = candidate
            .parent()
            .context("path has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let canon_parent = parent
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {}", parent.display()))?;

        if !canon_parent.starts_with(&self.data_dir) {
            bail!(
                "path {} escapes the data directory {}",
                candidate.display(),
                self.data_dir.display()
            );
        }

        let file_name = candidate
            .file_name()
            .context("path has no file name component")?;
        Ok(canon_parent.join(file_name))
    }
}

/// Syntactic traversal check with no filesystem access at all: rejects any
/// path containing a `..` component. Used at the very top of handlers that
/// accept a user-supplied path, before `require_within_data_dir` (which
/// itself touches the filesystem to canonicalize) ever runs.
pub fn has_parent_dir_component(candidate: &Path) -> bool {
    candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

#[cfg(test)]
mod traversal_precheck_tests {
    use super::*;

    #[test]
    fn flags_dotdot_components() {
        assert!(has_parent_dir_component(Path::new("../../../etc/passwd")));
    }

    #[test]
    fn accepts_plain_relative_path() {
        assert!(!has_parent_dir_component(Path::new("holdings/my_etf.csv")));
    }
}
