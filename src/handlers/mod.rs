// =============================================================================
// Command handlers — one async function per recognized command
// =============================================================================

pub mod get_health;
pub mod portfolio;
pub mod tr_auth;

/// Extract a required string field from a command payload.
fn require_str(payload: &serde_json::Map<String, serde_json::Value>, field: &str) -> anyhow::Result<String> {
    payload
    .get(field)
    .and_then(|v| v.as_str())
    .map(str::to_string)
    .ok_or_else(|| crate::error::EngineError::InvalidCommand(format!("missing or non-string field '{field}'")).into())
}

fn optional_i64(payload: &serde_json::Map<String, serde_json::Value>, field: &str, default: i64) -> i64 {
    payload.get(field).and_then(|v| v.as_i64()).unwrap_or(default)
}

fn optional_bool(payload: &serde_json::Map<String, serde_json::Value>, field: &str) -> bool {
    payload.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}
