// =============================================================================
// Atomic report writers — health report (JSON) and breakdown report (CSV)
// =============================================================================
//
// Same write-temp-fsync-rename pattern the donor uses for its runtime
// config: a half-written report after a crash is a critical defect.
// =============================================================================

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::aggregation::AggregationResult;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealthReport {
    pub run_id: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub holdings_count: usize,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// Write `value` to `path` atomically: serialize to a sibling temp file,
/// flush, fsync, then rename over the destination. Any failure before the
/// rename leaves the previous contents untouched.
pub fn write_json_atomic(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    let dir = path.parent().ok_or_else(|| anyhow::anyhow!("report path has no parent"))?;
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let write_result = (|| -> anyhow::Result<()> {
            let mut file = File::create(&tmp_path)?;
            let bytes = serde_json::to_vec_pretty(value)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            Ok(())
        })();

    match write_result {
        Ok(()) => {
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

/// Write the breakdown report as CSV, same atomic discipline.
pub fn write_breakdown_csv_atomic(path: &Path, result: &AggregationResult) -> anyhow::Result<()> {
    let dir = path.parent().ok_or_else(|| anyhow::anyhow!("report path has no parent"))?;
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let write_result = (|| -> anyhow::Result<()> {
            let file = File::create(&tmp_path)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(["kind", "label", "value", "fraction"])?;
            for b in &result.by_sector {
                writer.write_record(["sector", &b.label, &b.value.to_string(), &b.fraction.to_string()])?;
            }
            for b in &result.by_region {
                writer.write_record(["region", &b.label, &b.value.to_string(), &b.fraction.to_string()])?;
            }
            writer.flush()?;
            writer.into_inner()?.sync_all()?;
            Ok(())
        })();

    match write_result {
        Ok(()) => {
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

pub fn read_json(path: &Path) -> anyhow::Result<Value> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_json_write_is_readable_afterwards() {
        let dir = std::env::temp_dir().join(format!("report-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline_health.json");

        let report = PipelineHealthReport {
            run_id: "run-1".into(),
            success: true,
            errors: Vec::new(),
            duration_ms: 42,
            holdings_count: 3,
            generated_at: chrono::Utc::now(),
        };
        write_json_atomic(&path, &report).unwrap();

        let value = read_json(&path).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn never_leaves_a_truncated_file_after_a_second_write() {
        let dir = std::env::temp_dir().join(format!("report-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline_health.json");

        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();

        let value = read_json(&path).unwrap();
        assert_eq!(value["v"], 2);
    }
}
