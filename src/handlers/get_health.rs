// =============================================================================
// get_health — version + approximate resident memory
// =============================================================================

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::state::EngineState;
use crate::types::ProgressEvent;

pub async fn run(
    _state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "memory_usage_mb": approximate_memory_mb(),
            }))
}

/// Best-effort resident set size in megabytes. Parsed from `/proc/self/status`
/// on Linux; returns `0.0` on platforms where that file doesn't exist rather
/// than failing the health check over a cosmetic metric.
fn approximate_memory_mb() -> f64 {
    std::fs::read_to_string("/proc/self/status")
    .ok()
    .and_then(|s| {
            s.lines().find_map(|line| {
                    line.strip_prefix("VmRSS:").map(|rest| {
                            rest.trim()
                            .trim_end_matches(" kB")
                            .parse::<f64>()
                            .unwrap_or(0.0)
                            / 1024.0
                        })
                })
        })
    .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_memory_is_non_negative() {
        assert!(approximate_memory_mb() >= 0.0);
    }
}
