// =============================================================================
// Portfolio handlers — sync, pipeline run, dashboard, holdings upload
// =============================================================================

use std::path::PathBuf;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::config;
use crate::error::EngineError;
use crate::handlers::{optional_i64, require_str};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::pipeline::reports::read_json;
use crate::state::EngineState;
use crate::types::{Position, ProgressEvent};

/// Pulls positions from the broker into the local store. Deliberately does
/// **not** touch decomposition, enrichment, or aggregation — those only run
/// from `run_pipeline` (universal invariant).
pub async fn sync_portfolio(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let portfolio_id = optional_i64(&payload, "portfolio_id", 1);

    let bridge = state.bridge().await;
    let raw = bridge.call("fetch_portfolio", serde_json::json!({})).await?;

    let rows = raw
    .get("positions")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default();

    let mut positions = Vec::with_capacity(rows.len());
    let mut dropped = 0u32;
    for row in rows {
        match parse_position(&row, portfolio_id) {
            Some(p) => positions.push(p),
            None => dropped += 1,
        }
    }

    state.store.replace_positions(portfolio_id, &positions).await?;

    Ok(serde_json::json!({
                "synced": positions.len(),
                "dropped_invalid": dropped,
            }))
}

fn parse_position(row: &Value, portfolio_id: i64) -> Option<Position> {
    let isin = row.get("isin")?.as_str()?.to_string();
    if !crate::identity::is_valid_isin(&isin) {
        return None;
    }
    Some(Position {
            isin,
            quantity: row.get("quantity")?.as_str().and_then(|s| s.parse().ok())?,
            avg_cost: row.get("avg_cost")?.as_str().and_then(|s| s.parse().ok())?,
            current_price: row.get("current_price")?.as_str().and_then(|s| s.parse().ok())?,
            name: row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            portfolio_id,
        })
}

pub async fn run_pipeline(
    state: &EngineState,
    payload: Map<String, Value>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let portfolio_id = optional_i64(&payload, "portfolio_id", 1);
    let config = PipelineConfig::new(
        portfolio_id,
        state.config.health_report_path(),
        state.config.breakdown_report_path(),
        state.config.dashboard_report_path(),
    );
    let pipeline = Pipeline::new(
        state.store.clone(),
        state.registry.clone(),
        state.enricher.clone(),
        state.worker_pool.clone(),
        config,
    );
    let result = pipeline.run(progress).await;

    Ok(serde_json::json!({
                "success": result.success,
                "errors": result.errors,
                "durationMs": result.duration_ms,
                "runId": result.run_id,
            }))
}

pub async fn get_dashboard_data(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let _portfolio_id = optional_i64(&payload, "portfolio_id", 1);
    // The donor's X-ray consumer accepted a portfolioId it never used
    // internally; this handler is likewise scoped to the single current
    // portfolio's last pipeline run pending a documented multi-portfolio
    // design.
    let dashboard_path = state.config.dashboard_report_path();
    if !dashboard_path.exists() {
        return Err(EngineError::DataFetchFailed("no pipeline run has completed yet".into()).into());
    }
    read_json(&dashboard_path).map_err(|e| EngineError::DataFetchFailed(format!("failed to read dashboard report: {e}")).into())
}

pub async fn upload_holdings(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let isin = require_str(&payload, "isin")?;
    if !crate::identity::is_valid_isin(&isin) {
        return Err(EngineError::TickerInvalid(isin).into());
    }

    let file_path = require_str(&payload, "file_path")?;
    let candidate = PathBuf::from(&file_path);
    if config::has_parent_dir_component(&candidate) {
        return Err(EngineError::InvalidCommand(format!("path '{file_path}' contains a parent-directory component")).into());
    }

    let full_path = state.config.data_dir.join("uploads").join(&candidate);
    let resolved = state.config.require_within_data_dir(&full_path)?;

    let raw = std::fs::read(&resolved).map_err(EngineError::Io)?;
    let mut reader = csv::Reader::from_reader(raw.as_slice());
    let mut count = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::AdapterFormat(e.to_string()))?;
        let _weight: Decimal = record
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::AdapterFormat("row missing numeric weight column".into()))?;
        count += 1;
    }

    Ok(serde_json::json!({"isin": isin, "rows_ingested": count}))
}

pub async fn set_hive_contribution(
    state: &EngineState,
    payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let enabled = payload
    .get("enabled")
    .and_then(|v| v.as_bool())
    .ok_or_else(|| EngineError::InvalidCommand("missing or non-bool field 'enabled'".into()))?;
    state.hive_contribution.set(enabled);
    Ok(serde_json::json!({"enabled": enabled}))
}

pub async fn get_pipeline_report(
    state: &EngineState,
    _payload: Map<String, Value>,
    _progress: mpsc::UnboundedSender<ProgressEvent>,
) -> anyhow::Result<Value> {
    let path = state.config.health_report_path();
    if !path.exists() {
        return Err(EngineError::DataFetchFailed("no pipeline run has completed yet".into()).into());
    }
    read_json(&path).map_err(|e| EngineError::DataFetchFailed(format!("failed to read health report: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_position_drops_invalid_isin() {
        let row = serde_json::json!({"isin": "not-an-isin", "quantity": "1", "avg_cost": "1", "current_price": "1"});
        assert!(parse_position(&row, 1).is_none());
    }

    #[test]
    fn parse_position_accepts_well_formed_row() {
        let row = serde_json::json!({
                "isin": "US0378331005",
                "quantity": "1.5",
                "avg_cost": "100.00",
                "current_price": "150.00",
                "name": "Apple",
            });
        let p = parse_position(&row, 1).unwrap();
        assert_eq!(p.isin, "US0378331005");
    }
}
