//! Per-tick data rows.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{Result, WatererError};
use crate::uncertain::Uncertain;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub time: DateTime<Local>,
    pub weights: Vec<Uncertain>,
    pub watered: Vec<bool>,
    pub n_filtered: Vec<usize>,
    pub goals: Vec<f64>,
    pub n_unsuccessful: usize,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
}

/// Destination for tick rows.
pub trait DataSink {
    fn add_entry(&mut self, record: &TickRecord) -> Result<()>;
}

/// Column names for `n_channels` channels (1-based suffixes).
pub fn header(n_channels: usize) -> Vec<String> {
    let mut cols = vec!["time".to_owned()];
    for i in 1..=n_channels {
        for name in ["avg", "std", "watered", "n_filtered", "goal"] {
            cols.push(format!("{name}_{i}"));
        }
    }
    cols.extend(["n_unsuccessful", "hum", "temp"].map(str::to_owned));
    cols
}

fn row(record: &TickRecord) -> Vec<String> {
    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    let mut out = vec![record.time.format(TIME_FORMAT).to_string()];
    for i in 0..record.weights.len() {
        let w = record.weights[i];
        out.push(w.value.to_string());
        out.push(w.stderr.to_string());
        out.push(record.watered.get(i).copied().unwrap_or(false).to_string());
        out.push(record.n_filtered.get(i).copied().unwrap_or(0).to_string());
        out.push(record.goals.get(i).map(f64::to_string).unwrap_or_default());
    }
    out.push(record.n_unsuccessful.to_string());
    out.push(opt(record.humidity));
    out.push(opt(record.temperature));
    out
}

/// Append-only CSV file; the header is written when the file is empty.
#[derive(Debug)]
pub struct CsvDataLog {
    path: PathBuf,
    n_channels: usize,
}

impl CsvDataLog {
    pub fn new(path: impl Into<PathBuf>, n_channels: usize) -> Self {
        Self {
            path: path.into(),
            n_channels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSink for CsvDataLog {
    fn add_entry(&mut self, record: &TickRecord) -> Result<()> {
        let err = |e: &dyn std::fmt::Display| {
            eyre::Report::new(WatererError::Io(format!("{}: {e}", self.path.display())))
        };
        if record.weights.len() != self.n_channels {
            return Err(eyre::Report::new(WatererError::ChannelMismatch {
                expected: self.n_channels,
                actual: record.weights.len(),
            }));
        }
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| err(&e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| err(&e))?;
        let empty = file.metadata().map_err(|e| err(&e))?.len() == 0;
        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            w.write_record(header(self.n_channels)).map_err(|e| err(&e))?;
        }
        w.write_record(row(record)).map_err(|e| err(&e))?;
        w.flush().map_err(|e| err(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> TickRecord {
        TickRecord {
            time: Local::now(),
            weights: vec![Uncertain::new(250.5, 0.25); n],
            watered: vec![true; n],
            n_filtered: vec![2; n],
            goals: vec![300.0; n],
            n_unsuccessful: 1,
            humidity: None,
            temperature: Some(21.5),
        }
    }

    #[test]
    fn header_layout() {
        let h = header(2);
        assert_eq!(h.len(), 1 + 2 * 5 + 3);
        assert_eq!(h[0], "time");
        assert_eq!(&h[1..6], ["avg_1", "std_1", "watered_1", "n_filtered_1", "goal_1"]);
        assert_eq!(&h[11..], ["n_unsuccessful", "hum", "temp"]);
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/data.csv");
        let mut log = CsvDataLog::new(&path, 2);
        log.add_entry(&record(2)).unwrap();
        log.add_entry(&record(2)).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(headers.len(), 14);
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "250.5");
        assert_eq!(&rows[0][3], "true");
        assert_eq!(&rows[0][12], "");
        assert_eq!(&rows[0][13], "21.5");
    }

    #[test]
    fn wrong_width_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvDataLog::new(dir.path().join("d.csv"), 3);
        assert!(log.add_entry(&record(2)).is_err());
    }
}
