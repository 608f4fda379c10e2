use hdrhistogram::Histogram;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency collector for one benchmark run.
///
/// Owned by the driver; every successful round trip adds one sample. Exact
/// samples are kept for mean/standard deviation, the histogram only feeds
/// percentiles.
#[derive(Debug)]
pub struct Stats {
    samples: Vec<Duration>,
    // 1ns to 60s range, 3 significant digits
    latency_hist: Histogram<u64>,
    sent_count: u64,
    retry_count: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            latency_hist: Histogram::new_with_bounds(1, 60_000_000_000, 3)
                .expect("constant histogram bounds are valid"),
            sent_count: 0,
            retry_count: 0,
        }
    }

    /// Record a published request
    pub fn record_sent(&mut self) {
        self.sent_count += 1;
    }

    /// Record a reply that carried a domain error
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Record a successful round trip
    pub fn record_sample(&mut self, latency: Duration) {
        let ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_hist.saturating_record(ns.max(1));
        self.samples.push(latency);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    /// Arithmetic mean in nanoseconds; `None` when no samples were taken.
    pub fn mean_ns(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|d| d.as_nanos() as f64).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Population standard deviation (divisor N) in nanoseconds.
    pub fn std_dev_ns(&self) -> Option<f64> {
        let mean = self.mean_ns()?;
        let n = self.samples.len() as f64;
        let v = self
            .samples
            .iter()
            .map(|d| (d.as_nanos() as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(v.sqrt())
    }

    pub fn summary(&self) -> Option<Summary> {
        let mean_ns = self.mean_ns()?;
        let std_dev_ns = self.std_dev_ns()?;
        let min = self.samples.iter().min().copied().unwrap_or_default();
        let max = self.samples.iter().max().copied().unwrap_or_default();
        Some(Summary {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            sample_count: self.samples.len() as u64,
            sent_count: self.sent_count,
            retry_count: self.retry_count,
            mean_ns,
            std_dev_ns,
            latency_ns_min: min.as_nanos() as u64,
            latency_ns_max: max.as_nanos() as u64,
            latency_ns_p50: self.latency_hist.value_at_quantile(0.5),
            latency_ns_p95: self.latency_hist.value_at_quantile(0.95),
            latency_ns_p99: self.latency_hist.value_at_quantile(0.99),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub timestamp: u64,
    pub sample_count: u64,
    pub sent_count: u64,
    pub retry_count: u64,
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub latency_ns_min: u64,
    pub latency_ns_max: u64,
    pub latency_ns_p50: u64,
    pub latency_ns_p95: u64,
    pub latency_ns_p99: u64,
}

impl Summary {
    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean_ns.round() as u64)
    }

    pub fn std_dev(&self) -> Duration {
        Duration::from_nanos(self.std_dev_ns.round() as u64)
    }

    /// Convert to CSV row
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.2},{:.2},{},{},{},{},{}",
            self.timestamp,
            self.sample_count,
            self.sent_count,
            self.retry_count,
            self.mean_ns,
            self.std_dev_ns,
            self.latency_ns_min,
            self.latency_ns_max,
            self.latency_ns_p50,
            self.latency_ns_p95,
            self.latency_ns_p99
        )
    }

    /// CSV header
    pub fn csv_header() -> &'static str {
        "timestamp,sample_count,sent_count,retry_count,latency_ns_mean,latency_ns_stddev,latency_ns_min,latency_ns_max,latency_ns_p50,latency_ns_p95,latency_ns_p99"
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |ns: f64| ns / 1_000_000.0;
        writeln!(
            f,
            "average RTT is {:.3} ms (+- {:.3} ms) over {} samples",
            ms(self.mean_ns),
            ms(self.std_dev_ns),
            self.sample_count
        )?;
        write!(
            f,
            "min {:.3} ms, p50 {:.3} ms, p95 {:.3} ms, p99 {:.3} ms, max {:.3} ms; {} requests sent, {} retried",
            ms(self.latency_ns_min as f64),
            ms(self.latency_ns_p50 as f64),
            ms(self.latency_ns_p95 as f64),
            ms(self.latency_ns_p99 as f64),
            ms(self.latency_ns_max as f64),
            self.sent_count,
            self.retry_count
        )
    }
}
