//! Appending rows to `<data_dir>/<sensor>_log.csv`.
//!
//! Rows are `value,timestamp` with no header, the format the hub follows.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct LogRow<'a> {
    pub value: f64,
    pub timestamp: &'a str,
}

pub fn log_path(data_dir: &Path, sensor: &str) -> PathBuf {
    data_dir.join(format!("{sensor}_log.csv"))
}

/// Append one row, creating the directory and file on first use.
pub fn append_row(path: &Path, row: &LogRow<'_>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    wtr.serialize(row)
        .with_context(|| format!("failed to write {}", path.display()))?;
    wtr.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Median of a batch, or `None` if it holds no finite values.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);

    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn median_even_averages_middle_pair() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn median_ignores_spike() {
        assert_eq!(median(&[1700.0, 1702.0, 3300.0, 1701.0, 1699.0]), Some(1701.0));
    }

    #[test]
    fn median_skips_non_finite() {
        assert_eq!(median(&[f64::NAN, 5.0]), Some(5.0));
        assert_eq!(median(&[f64::NAN]), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn log_path_uses_sensor_name() {
        assert_eq!(
            log_path(Path::new("data"), "moisture"),
            PathBuf::from("data/moisture_log.csv")
        );
    }

    #[test]
    fn append_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir.path().join("nested"), "moisture");

        append_row(&path, &LogRow { value: 1712.5, timestamp: "2024-05-01 08:00:00" }).unwrap();
        append_row(&path, &LogRow { value: 1710.0, timestamp: "2024-05-01 08:05:00" }).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1712.5,2024-05-01 08:00:00\n1710.0,2024-05-01 08:05:00\n");
    }
}
