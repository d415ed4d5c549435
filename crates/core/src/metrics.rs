//! Labeled metric families and Prometheus text rendering.
//!
//! The registry holds counters and summaries that callers update inline, plus
//! pull [`Collector`]s that are asked for their current values at scrape
//! time. [`MetricsRegistry::render`] produces the Prometheus text exposition
//! format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

/// Prometheus metric type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Summary,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
        }
    }
}

/// One labeled value within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Suffix appended to the family name (`"_sum"`, `"_count"`, or empty).
    pub suffix: &'static str,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// A named group of samples sharing a type and help text.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// A source of metric values evaluated at scrape time.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Vec<MetricFamily>;
}

fn label_pairs(names: &[&'static str], values: &[String]) -> Vec<(String, String)> {
    names
        .iter()
        .zip(values)
        .map(|(n, v)| ((*n).to_owned(), v.clone()))
        .collect()
}

fn key_of(label_values: &[&str]) -> Vec<String> {
    label_values.iter().map(|v| (*v).to_owned()).collect()
}

/// A monotonically increasing counter partitioned by label values.
#[derive(Debug)]
pub struct CounterVec {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    values: DashMap<Vec<String>, AtomicU64>,
}

impl CounterVec {
    pub fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            labels,
            values: DashMap::new(),
        }
    }

    /// Increment the counter for `label_values` by one.
    pub fn inc(&self, label_values: &[&str]) {
        self.add(label_values, 1);
    }

    /// Increment the counter for `label_values` by `n`.
    pub fn add(&self, label_values: &[&str], n: u64) {
        debug_assert_eq!(label_values.len(), self.labels.len());
        if let Some(cell) = self.values.get(&key_of(label_values)) {
            cell.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.values
            .entry(key_of(label_values))
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Current value for `label_values` (0 if never incremented).
    pub fn get(&self, label_values: &[&str]) -> u64 {
        self.values
            .get(&key_of(label_values))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> MetricFamily {
        let samples = self
            .values
            .iter()
            .map(|e| Sample {
                suffix: "",
                labels: label_pairs(self.labels, e.key()),
                value: e.value().load(Ordering::Relaxed) as f64,
            })
            .collect();
        MetricFamily {
            name: self.name.to_owned(),
            help: self.help.to_owned(),
            kind: MetricKind::Counter,
            samples,
        }
    }
}

#[derive(Debug, Default)]
struct SummaryCell {
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

/// A latency summary (count and sum) partitioned by label values.
#[derive(Debug)]
pub struct SummaryVec {
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    values: DashMap<Vec<String>, SummaryCell>,
}

impl SummaryVec {
    pub fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            labels,
            values: DashMap::new(),
        }
    }

    /// Record one observation.
    pub fn observe(&self, label_values: &[&str], elapsed: Duration) {
        debug_assert_eq!(label_values.len(), self.labels.len());
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let cell = self.values.entry(key_of(label_values)).or_default();
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Number of observations recorded for `label_values`.
    pub fn count(&self, label_values: &[&str]) -> u64 {
        self.values
            .get(&key_of(label_values))
            .map_or(0, |c| c.count.load(Ordering::Relaxed))
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> MetricFamily {
        let mut samples = Vec::with_capacity(self.values.len() * 2);
        for e in &self.values {
            let labels = label_pairs(self.labels, e.key());
            let sum = e.value().sum_nanos.load(Ordering::Relaxed) as f64 / 1e9;
            let count = e.value().count.load(Ordering::Relaxed) as f64;
            samples.push(Sample {
                suffix: "_sum",
                labels: labels.clone(),
                value: sum,
            });
            samples.push(Sample {
                suffix: "_count",
                labels,
                value: count,
            });
        }
        MetricFamily {
            name: self.name.to_owned(),
            help: self.help.to_owned(),
            kind: MetricKind::Summary,
            samples,
        }
    }
}

/// Process-local metric registry.
///
/// Families are created on first request and shared afterwards, so several
/// components may ask for the same counter by name.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: DashMap<&'static str, Arc<CounterVec>>,
    summaries: DashMap<&'static str, Arc<SummaryVec>>,
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("counters", &self.counters.len())
            .field("summaries", &self.summaries.len())
            .finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter family `name`.
    pub fn counter_vec(
        &self,
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Arc<CounterVec> {
        self.counters
            .entry(name)
            .or_insert_with(|| Arc::new(CounterVec::new(name, help, labels)))
            .clone()
    }

    /// Get or create the summary family `name`.
    pub fn summary_vec(
        &self,
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Arc<SummaryVec> {
        self.summaries
            .entry(name)
            .or_insert_with(|| Arc::new(SummaryVec::new(name, help, labels)))
            .clone()
    }

    /// Register a pull collector, evaluated on every [`render`](Self::render).
    pub fn register_collector(&self, collector: Arc<dyn Collector>) {
        if let Ok(mut guard) = self.collectors.write() {
            guard.push(collector);
        }
    }

    /// Gather every family, sorted by name.
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = self
            .counters
            .iter()
            .map(|c| c.snapshot())
            .chain(self.summaries.iter().map(|s| s.snapshot()))
            .collect();

        // Clone the list so the lock is not held across `.await`.
        let collectors: Vec<Arc<dyn Collector>> = self
            .collectors
            .read()
            .map(|g| g.clone())
            .unwrap_or_default();
        for c in collectors {
            families.extend(c.collect().await);
        }

        for f in &mut families {
            f.samples.sort_by(|a, b| a.labels.cmp(&b.labels).then(a.suffix.cmp(b.suffix)));
        }
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }

    /// Render every family in Prometheus text exposition format.
    pub async fn render(&self) -> String {
        let families = self.gather().await;
        let mut buf = String::with_capacity(1024);
        for family in &families {
            write_family(&mut buf, family);
        }
        buf
    }
}

/// Write one family with its HELP and TYPE header.
pub fn write_family(buf: &mut String, family: &MetricFamily) {
    let _ = writeln!(buf, "# HELP {} {}", family.name, family.help);
    let _ = writeln!(buf, "# TYPE {} {}", family.name, family.kind.as_str());
    for s in &family.samples {
        let _ = write!(buf, "{}{}", family.name, s.suffix);
        if !s.labels.is_empty() {
            buf.push('{');
            for (i, (k, v)) in s.labels.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                let _ = write!(buf, "{k}=\"{}\"", escape_label_value(v));
            }
            buf.push('}');
        }
        let _ = writeln!(buf, " {}", s.value);
    }
    buf.push('\n');
}

/// Escape a label value for the text exposition format.
fn escape_label_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
