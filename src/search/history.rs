//! Append-only record of evaluated candidates.
//!
//! Entries are never reordered or removed. The aging population is the
//! most recent window of this list, not the best entries. On disk the
//! history is JSON lines, one entry per line, appended as generations
//! complete.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::space::Parametrization;
use crate::error::{NasError, Result};
use crate::Metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position in the history, starting at 0.
    pub index: usize,
    pub fingerprint: String,
    pub parametrization: Parametrization,
    #[serde(with = "metric_values")]
    pub metrics: Metrics,
}

impl HistoryEntry {
    /// Metric value, `+inf` when absent.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parametrization: Parametrization, metrics: Metrics) -> &HistoryEntry {
        let index = self.entries.len();
        self.entries.push(HistoryEntry {
            index,
            fingerprint: parametrization.fingerprint(),
            parametrization,
            metrics,
        });
        &self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// The `size` most recently added entries.
    pub fn population(&self, size: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(size);
        &self.entries[start..]
    }

    /// Lowest value of `objective`; the earliest entry wins ties.
    pub fn best(&self, objective: &str) -> Option<&HistoryEntry> {
        self.entries.iter().fold(None, |best, entry| match best {
            Some(b) if b.metric(objective) <= entry.metric(objective) => Some(b),
            _ => Some(entry),
        })
    }

    /// Entries not dominated on `objectives` (all minimised), in history
    /// order. Entries with a non-finite objective are excluded.
    pub fn pareto_front(&self, objectives: &[String]) -> Vec<&HistoryEntry> {
        let finite: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| objectives.iter().all(|o| e.metric(o).is_finite()))
            .collect();
        finite
            .iter()
            .filter(|candidate| !finite.iter().any(|other| dominates(other, candidate, objectives)))
            .copied()
            .collect()
    }
}

fn dominates(a: &HistoryEntry, b: &HistoryEntry, objectives: &[String]) -> bool {
    let mut strictly = false;
    for objective in objectives {
        let (x, y) = (a.metric(objective), b.metric(objective));
        if x > y {
            return false;
        }
        if x < y {
            strictly = true;
        }
    }
    strictly
}

// ─── Persistence ──────────────────────────────────────────────────

/// JSON-lines history file.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries, creating the file if needed.
    pub fn append(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read the whole history back. A missing file is an empty history.
    pub fn load(&self) -> Result<History> {
        if !self.path.exists() {
            return Ok(History::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut history = History::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: HistoryEntry = serde_json::from_str(&line)?;
            if entry.index != history.len() {
                return Err(NasError::Config(format!(
                    "{}:{}: expected entry {}, found {}",
                    self.path.display(),
                    line_no + 1,
                    history.len(),
                    entry.index
                )));
            }
            history.entries.push(entry);
        }
        Ok(history)
    }
}

/// Metric maps with non-finite values. JSON has no infinity, so those are
/// written as the strings `"inf"`, `"-inf"` and `"nan"`.
pub(crate) mod metric_values {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        metrics: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&String, Value> = metrics
            .iter()
            .map(|(k, &v)| {
                let value = if v.is_finite() {
                    Value::Number(v)
                } else if v.is_nan() {
                    Value::Text("nan".into())
                } else if v > 0.0 {
                    Value::Text("inf".into())
                } else {
                    Value::Text("-inf".into())
                };
                (k, value)
            })
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let encoded = BTreeMap::<String, Value>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::Number(n) => n,
                    Value::Text(t) => match t.as_str() {
                        "inf" => f64::INFINITY,
                        "-inf" => f64::NEG_INFINITY,
                        "nan" => f64::NAN,
                        other => {
                            return Err(<D::Error as Error>::custom(format!(
                                "invalid metric '{}'",
                                other
                            )))
                        }
                    },
                };
                Ok((k, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> Parametrization {
        Parametrization {
            kernel_index: vec![k, 0],
            width_index: vec![0],
            depth: vec![1],
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn population_is_the_most_recent_window() {
        let mut history = History::new();
        for i in 0..5 {
            history.push(params(i), metrics(&[("val_error", i as f64)]));
        }
        let window: Vec<usize> = history.population(3).iter().map(|e| e.index).collect();
        assert_eq!(window, vec![2, 3, 4]);
        assert_eq!(history.population(10).len(), 5);
        assert_eq!(history.best("val_error").unwrap().index, 0);
    }

    #[test]
    fn pareto_front_drops_dominated_and_failed() {
        let mut history = History::new();
        history.push(params(0), metrics(&[("val_error", 0.1), ("macs", 900.0)]));
        history.push(params(1), metrics(&[("val_error", 0.2), ("macs", 500.0)]));
        history.push(params(2), metrics(&[("val_error", 0.3), ("macs", 950.0)]));
        history.push(params(3), metrics(&[("val_error", f64::INFINITY), ("macs", 10.0)]));
        let objectives = vec!["val_error".to_string(), "macs".to_string()];
        let front: Vec<usize> = history
            .pareto_front(&objectives)
            .iter()
            .map(|e| e.index)
            .collect();
        assert_eq!(front, vec![0, 1]);
    }

    #[test]
    fn file_round_trip_keeps_infinite_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("run").join("history.jsonl"));
        assert!(file.load().unwrap().is_empty());

        let mut history = History::new();
        history.push(params(1), metrics(&[("val_error", 0.25)]));
        history.push(params(2), metrics(&[("val_error", f64::INFINITY)]));
        file.append(&history.entries()[..1]).unwrap();
        file.append(&history.entries()[1..]).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.entries()[0], history.entries()[0]);
        assert!(loaded.entries()[1].metric("val_error").is_infinite());
        assert_eq!(loaded.entries()[1].fingerprint, params(2).fingerprint());
    }

    #[test]
    fn out_of_order_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("history.jsonl"));
        let mut history = History::new();
        history.push(params(1), metrics(&[]));
        history.push(params(2), metrics(&[]));
        file.append(&history.entries()[1..]).unwrap();
        assert!(matches!(file.load(), Err(NasError::Config(_))));
    }
}
