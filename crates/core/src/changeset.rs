//! Flat-file staging of proposed ticker changes. A file written by an export
//! run must always be replayable by a later apply run, so reader and writer
//! share the `ChangeRecord` column contract.

use crate::domain::thesis::ChangeRecord;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Timestamped file name so repeated export runs never clobber each other.
pub fn default_export_path(out_dir: &Path) -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    out_dir.join(format!("ticker_updates_{ts}.csv"))
}

pub fn write_change_set(path: &Path, records: &[ChangeRecord]) -> anyhow::Result<()> {
    anyhow::ensure!(!records.is_empty(), "change-set must be non-empty");

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create change-set file {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .context("failed to serialize change record")?;
    }
    writer.flush().context("failed to flush change-set file")?;

    tracing::info!(path = %path.display(), rows = records.len(), "change-set written");
    Ok(())
}

pub fn read_change_set(path: &Path) -> anyhow::Result<Vec<ChangeRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open change-set file {}", path.display()))?;

    let mut out = Vec::new();
    for row in reader.deserialize::<ChangeRecord>() {
        out.push(row.context("malformed change-set row")?);
    }
    Ok(out)
}
