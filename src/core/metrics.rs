//! Execution statistics for blocks and edges
//!
//! The scheduler feeds an [`ExecutionStats`] with one sample per block update
//! (CPU seconds, wall seconds, logical timestamp) and one sample per edge
//! propagation (timestamp, payload size). Samples are kept in bounded rings;
//! totals used for the share-of-time columns cover the whole run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use super::signal::Timestamp;

#[derive(Debug, Clone, Copy)]
struct UpdateSample {
    cpu: f64,
    wall: f64,
    timestamp: Timestamp,
}

#[derive(Debug, Clone, Default)]
struct BlockSeries {
    samples: VecDeque<UpdateSample>,
    updates: usize,
    total_cpu: f64,
    total_wall: f64,
}

#[derive(Debug, Clone)]
struct EdgeSeries {
    source: String,
    destination: Option<String>,
    timestamps: VecDeque<Timestamp>,
    samples: usize,
    payload_bytes: Option<usize>,
}

/// Per-block and per-edge sample rings for one model
#[derive(Debug, Clone)]
pub struct ExecutionStats {
    window: usize,
    blocks: BTreeMap<String, BlockSeries>,
    edges: BTreeMap<String, EdgeSeries>,
}

impl ExecutionStats {
    /// Create a recorder keeping at most `window` samples per series
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            blocks: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Record one `update()` of `block`
    pub fn record_update(&mut self, block: &str, cpu: f64, wall: f64, timestamp: Timestamp) {
        let series = self.blocks.entry(block.to_string()).or_default();
        if series.samples.len() == self.window {
            series.samples.pop_front();
        }
        series.samples.push_back(UpdateSample {
            cpu,
            wall,
            timestamp,
        });
        series.updates += 1;
        series.total_cpu += cpu;
        series.total_wall += wall;
    }

    /// Record one propagation along the edge named `public_name`
    ///
    /// `payload_size` is only evaluated for the first sample of each edge.
    pub fn record_edge<F>(
        &mut self,
        public_name: &str,
        source: &str,
        destination: Option<&str>,
        timestamp: Timestamp,
        payload_size: F,
    ) where
        F: FnOnce() -> usize,
    {
        let series = self
            .edges
            .entry(public_name.to_string())
            .or_insert_with(|| EdgeSeries {
                source: source.to_string(),
                destination: destination.map(str::to_string),
                timestamps: VecDeque::new(),
                samples: 0,
                payload_bytes: None,
            });
        if series.payload_bytes.is_none() {
            series.payload_bytes = Some(payload_size());
        }
        if series.timestamps.len() == self.window {
            series.timestamps.pop_front();
        }
        series.timestamps.push_back(timestamp);
        series.samples += 1;
    }

    /// Aggregate the recorded samples
    pub fn report(&self) -> StatsReport {
        let total_cpu: f64 = self.blocks.values().map(|s| s.total_cpu).sum();
        let total_wall: f64 = self.blocks.values().map(|s| s.total_wall).sum();

        let blocks = self
            .blocks
            .iter()
            .map(|(name, series)| {
                let cpu: Vec<f64> = series.samples.iter().map(|s| s.cpu).collect();
                let wall: Vec<f64> = series.samples.iter().map(|s| s.wall).collect();
                BlockReport {
                    name: name.clone(),
                    updates: series.updates,
                    cpu_share: share(series.total_cpu, total_cpu),
                    wall_share: share(series.total_wall, total_wall),
                    cpu: Summary::of(&cpu),
                    wall: Summary::of(&wall),
                    last_timestamp: series.samples.back().map(|s| s.timestamp),
                }
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .map(|(name, series)| {
                let finite: Vec<f64> = series
                    .timestamps
                    .iter()
                    .filter(|t| t.is_finite())
                    .map(|t| t.as_secs())
                    .collect();
                let intervals: Vec<f64> = finite.windows(2).map(|w| w[1] - w[0]).collect();
                EdgeReport {
                    name: name.clone(),
                    source: series.source.clone(),
                    destination: series.destination.clone(),
                    samples: series.samples,
                    payload_bytes: series.payload_bytes,
                    interval: Summary::of(&intervals),
                }
            })
            .collect();

        StatsReport { blocks, edges }
    }
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Rolling summary of one sample channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub variance: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Summary {
    /// Summarize a set of samples; `None` when empty
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            mean,
            variance,
            p5: percentile(&sorted, 0.05),
            p25: percentile(&sorted, 0.25),
            p50: percentile(&sorted, 0.50),
            p75: percentile(&sorted, 0.75),
            p95: percentile(&sorted, 0.95),
        })
    }
}

/// Percentile of sorted, non-empty values
///
/// Uses linear interpolation between the two nearest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = (sorted.len() as f64 - 1.0) * p;
    let idx_lower = idx.floor() as usize;
    let idx_upper = idx.ceil() as usize;

    if idx_lower == idx_upper {
        sorted[idx_lower]
    } else {
        let lower = sorted[idx_lower];
        let upper = sorted[idx_upper];
        let fraction = idx - idx_lower as f64;
        lower + (upper - lower) * fraction
    }
}

/// Aggregated statistics of one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockReport {
    /// Block name, with `parent.` prefixes for nested models
    pub name: String,
    /// Number of `update()` calls over the whole run
    pub updates: usize,
    /// Percentage of the model's CPU time
    pub cpu_share: f64,
    /// Percentage of the model's wall time
    pub wall_share: f64,
    /// CPU seconds per update, over the window
    pub cpu: Option<Summary>,
    /// Wall seconds per update, over the window
    pub wall: Option<Summary>,
    /// Logical timestamp of the most recent update
    pub last_timestamp: Option<Timestamp>,
}

/// Aggregated statistics of one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeReport {
    /// Public signal name
    pub name: String,
    pub source: String,
    pub destination: Option<String>,
    /// Number of propagations over the whole run
    pub samples: usize,
    /// Serialized size of the first payload
    pub payload_bytes: Option<usize>,
    /// Seconds between consecutive finite timestamps
    pub interval: Option<Summary>,
}

/// Statistics of a model and, recursively, of its nested models
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub blocks: Vec<BlockReport>,
    pub edges: Vec<EdgeReport>,
}

impl StatsReport {
    /// Append a nested model's report under `prefix.`
    pub fn absorb(&mut self, prefix: &str, nested: StatsReport) {
        for mut block in nested.blocks {
            block.name = format!("{}.{}", prefix, block.name);
            self.blocks.push(block);
        }
        for mut edge in nested.edges {
            edge.name = format!("{}.{}", prefix, edge.name);
            edge.source = format!("{}.{}", prefix, edge.source);
            edge.destination = edge.destination.map(|d| format!("{}.{}", prefix, d));
            self.edges.push(edge);
        }
    }

    /// Report entry of a block by its global name
    pub fn block(&self, name: &str) -> Option<&BlockReport> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Report entry of an edge by its global name
    pub fn edge(&self, name: &str) -> Option<&EdgeReport> {
        self.edges.iter().find(|e| e.name == name)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:>8} {:>7} {:>7} {:>10} {:>10} {:>10}",
            "block", "updates", "cpu%", "wall%", "cpu p50", "cpu p95", "wall p50"
        )?;
        for b in &self.blocks {
            let (cpu50, cpu95) = b.cpu.map(|s| (s.p50, s.p95)).unwrap_or((0.0, 0.0));
            let wall50 = b.wall.map(|s| s.p50).unwrap_or(0.0);
            writeln!(
                f,
                "{:<32} {:>8} {:>6.1}% {:>6.1}% {:>9.2}ms {:>9.2}ms {:>9.2}ms",
                b.name,
                b.updates,
                b.cpu_share,
                b.wall_share,
                cpu50 * 1000.0,
                cpu95 * 1000.0,
                wall50 * 1000.0
            )?;
        }

        if !self.edges.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:<32} {:>8} {:>10} {:>12}",
                "signal", "samples", "bytes", "interval p50"
            )?;
            for e in &self.edges {
                let bytes = e
                    .payload_bytes
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let interval = e
                    .interval
                    .map(|s| format!("{:.3}s", s.p50))
                    .unwrap_or_else(|| "-".to_string());
                writeln!(f, "{:<32} {:>8} {:>10} {:>12}", e.name, e.samples, bytes, interval)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert!((percentile(&values, 0.5) - 50.5).abs() < 1e-9);
        assert!((percentile(&values, 0.95) - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&[4.0], 0.25), 4.0);
    }

    #[test]
    fn test_summary_mean_and_variance() {
        let summary = Summary::of(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.variance, 1.25);
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn test_window_bounds_samples_but_not_counts() {
        let mut stats = ExecutionStats::new(3);
        for i in 0..10 {
            stats.record_update("b", 1.0, 2.0, Timestamp::new(i as f64));
        }
        let report = stats.report();
        let block = report.block("b").unwrap();
        assert_eq!(block.updates, 10);
        assert_eq!(stats.blocks["b"].samples.len(), 3);
        assert_eq!(block.cpu_share, 100.0);
        assert_eq!(block.last_timestamp, Some(Timestamp::new(9.0)));
    }

    #[test]
    fn test_payload_size_measured_once() {
        let mut stats = ExecutionStats::new(8);
        let mut calls = 0;
        for i in 0..5 {
            stats.record_edge("s", "a", Some("b"), Timestamp::new(i as f64), || {
                calls += 1;
                42
            });
        }
        assert_eq!(calls, 1);
        let report = stats.report();
        let edge = report.edge("s").unwrap();
        assert_eq!(edge.samples, 5);
        assert_eq!(edge.payload_bytes, Some(42));
        assert_eq!(edge.interval.unwrap().p50, 1.0);
    }

    #[test]
    fn test_absorb_prefixes_nested_names() {
        let mut inner = ExecutionStats::new(4);
        inner.record_update("gain", 0.1, 0.1, Timestamp::ETERNITY);
        let mut report = StatsReport::default();
        report.absorb("child", inner.report());
        assert!(report.block("child.gain").is_some());
    }

    #[test]
    fn test_shares_split_total_time() {
        let mut stats = ExecutionStats::new(4);
        stats.record_update("a", 1.0, 3.0, Timestamp::ETERNITY);
        stats.record_update("b", 3.0, 1.0, Timestamp::ETERNITY);
        let report = stats.report();
        assert_eq!(report.block("a").unwrap().cpu_share, 25.0);
        assert_eq!(report.block("a").unwrap().wall_share, 75.0);
        assert!(report.to_string().contains("block"));
    }
}
