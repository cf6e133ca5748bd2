//! Durable position snapshots
//!
//! A snapshot is a versioned JSON document holding the full position set
//! plus metrics at capture time. The directory layout encodes capture
//! time (`<dir>/YYYY/MM/DD/HH/positions_HHMMSS.json`) for cheap
//! time-range scans; retention is an external cleaner's responsibility.
//! Recovery picks the newest file by filesystem modification time and
//! refuses partial or malformed payloads.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services_common::Position;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Current snapshot document version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Store metrics at capture time.
///
/// Carried as floats: derived metrics are not guaranteed to round-trip
/// decimal precision; the positions themselves carry exact strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    /// Number of positions captured
    pub position_count: u64,
    /// Sum of position values
    pub total_value: f64,
    /// Sum of unrealized PnL
    pub total_unrealized_pnl: f64,
    /// Sum of realized PnL
    pub total_realized_pnl: f64,
}

/// Versioned snapshot payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Document version, checked on load
    pub version: u32,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Full position set; decimal fields serialize as exact strings
    pub positions: Vec<Position>,
    /// Metrics at capture time
    pub metrics: SnapshotMetrics,
}

/// Write `doc` under `dir`, creating the time-encoded subdirectories.
///
/// # Errors
///
/// Returns an error if directory creation, serialization or the file
/// write fails.
pub fn write_snapshot(dir: &Path, doc: &SnapshotDocument) -> Result<PathBuf> {
    let ts = doc.timestamp;
    let subdir = dir.join(ts.format("%Y/%m/%d/%H").to_string());
    fs::create_dir_all(&subdir).with_context(|| format!("creating {}", subdir.display()))?;

    let path = subdir.join(format!("positions_{}.json", ts.format("%H%M%S")));
    let payload = serde_json::to_vec_pretty(doc).context("serializing snapshot")?;
    fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;

    debug!(path = %path.display(), positions = doc.positions.len(), "snapshot written");
    Ok(path)
}

/// Find the newest snapshot file under `dir` by modification time.
///
/// # Errors
///
/// Returns an error only on unreadable directory entries; a missing or
/// empty directory yields `Ok(None)`.
pub fn find_latest(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)
            .with_context(|| format!("reading {}", current.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "json") {
                let modified = entry.metadata()?.modified()?;
                if latest.as_ref().is_none_or(|(ts, _)| modified > *ts) {
                    latest = Some((modified, path));
                }
            }
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Load and validate a snapshot document.
///
/// # Errors
///
/// Returns an error for unreadable files, malformed JSON or an
/// unsupported version; callers fall back to an empty store.
pub fn load_snapshot(path: &Path) -> Result<SnapshotDocument> {
    let payload =
        fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let doc: SnapshotDocument =
        serde_json::from_slice(&payload).context("parsing snapshot payload")?;

    if doc.version != SNAPSHOT_VERSION {
        return Err(anyhow!(
            "unsupported snapshot version {} (expected {})",
            doc.version,
            SNAPSHOT_VERSION
        ));
    }
    if doc.positions.len() as u64 != doc.metrics.position_count {
        return Err(anyhow!(
            "snapshot position count mismatch: {} positions, metrics say {}",
            doc.positions.len(),
            doc.metrics.position_count
        ));
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use services_common::Market;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_doc() -> SnapshotDocument {
        let positions = vec![Position::new(
            "binance",
            "BTCUSDT",
            Market::Spot,
            dec!(1.5),
            dec!(40000),
            dec!(42000),
            1,
            dec!(0),
        )];
        SnapshotDocument {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            metrics: SnapshotMetrics {
                position_count: positions.len() as u64,
                total_value: 63000.0,
                total_unrealized_pnl: 3000.0,
                total_realized_pnl: 0.0,
            },
            positions,
        }
    }

    #[test]
    fn test_round_trip_preserves_decimal_fields() {
        let dir = TempDir::new().unwrap();
        let doc = sample_doc();

        let path = write_snapshot(dir.path(), &doc).unwrap();
        let loaded = load_snapshot(&path).unwrap();

        assert_eq!(loaded.positions, doc.positions);
        assert_eq!(loaded.positions[0].quantity, dec!(1.5));
    }

    #[test]
    fn test_directory_layout_encodes_capture_time() {
        let dir = TempDir::new().unwrap();
        let doc = sample_doc();

        let path = write_snapshot(dir.path(), &doc).unwrap();
        let relative = path.strip_prefix(dir.path()).unwrap();
        let components: Vec<_> =
            relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();

        // YYYY/MM/DD/HH/positions_HHMMSS.json
        assert_eq!(components.len(), 5);
        assert!(components[4].starts_with("positions_"));
        assert!(components[4].ends_with(".json"));
    }

    #[test]
    fn test_find_latest_picks_newest_mtime() {
        let dir = TempDir::new().unwrap();
        let older = write_snapshot(dir.path(), &sample_doc()).unwrap();

        let mut newer_doc = sample_doc();
        newer_doc.timestamp = newer_doc.timestamp + chrono::Duration::seconds(1);
        let newer = write_snapshot(dir.path(), &newer_doc).unwrap();
        // Make the ordering unambiguous regardless of filesystem timestamp granularity
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        filetime_set(&newer, future);

        let latest = find_latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest, newer);
        assert_ne!(latest, older);
    }

    fn filetime_set(path: &Path, to: std::time::SystemTime) {
        let file = fs::OpenOptions::new().append(true).open(path).unwrap();
        file.set_times(fs::FileTimes::new().set_modified(to)).unwrap();
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nothing-here");
        assert!(find_latest(&missing).unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions_000000.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"{ truncated").unwrap();

        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn test_version_mismatch_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut doc = sample_doc();
        doc.version = 99;
        let path = write_snapshot(dir.path(), &doc).unwrap();
        assert!(load_snapshot(&path).is_err());
    }
}
