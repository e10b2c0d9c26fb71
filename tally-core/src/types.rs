//! Core types for Tally

use crate::{Result, TallyError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Kind of a metric, deciding how updates merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Zero value, never stored
    #[default]
    Unknown,
    /// Updates accumulate
    Counter,
    /// Updates overwrite
    Gauge,
}

impl MetricKind {
    fn tag(self) -> u8 {
        match self {
            MetricKind::Unknown => 0,
            MetricKind::Counter => 1,
            MetricKind::Gauge => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MetricKind::Counter),
            2 => Some(MetricKind::Gauge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Unknown => "unknown",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(TallyError::InvalidMetric(format!(
                "unknown metric kind: {other}"
            ))),
        }
    }
}

/// A named counter or gauge value.
///
/// The value is kept as raw 64-bit storage and interpreted by `kind`, so
/// equality is exact: two gauges are equal only if their float bits match.
/// `Metric::default()` is the zero value and stands for "nothing stored".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Metric {
    kind: MetricKind,
    name: String,
    bits: u64,
}

impl Metric {
    /// Create a counter
    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Self {
            kind: MetricKind::Counter,
            name: name.into(),
            bits: value as u64,
        }
    }

    /// Create a gauge
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: MetricKind::Gauge,
            name: name.into(),
            bits: value.to_bits(),
        }
    }

    /// Parse a metric from its textual parts, e.g. `("counter", "hits", "3")`
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(TallyError::InvalidMetric("empty metric name".into()));
        }
        match kind {
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(|v| Metric::counter(name, v))
                .map_err(|e| TallyError::InvalidMetric(format!("counter {name}: {e}"))),
            MetricKind::Gauge => {
                let v = raw
                    .parse::<f64>()
                    .map_err(|e| TallyError::InvalidMetric(format!("gauge {name}: {e}")))?;
                if !v.is_finite() {
                    return Err(TallyError::InvalidMetric(format!(
                        "gauge {name}: non-finite value {raw}"
                    )));
                }
                Ok(Metric::gauge(name, v))
            }
            MetricKind::Unknown => unreachable!("FromStr never yields Unknown"),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter value.
    ///
    /// # Panics
    ///
    /// Panics if the metric is not a counter.
    pub fn int64(&self) -> i64 {
        assert_eq!(
            self.kind,
            MetricKind::Counter,
            "int64() called on {} metric {:?}",
            self.kind,
            self.name
        );
        self.bits as i64
    }

    /// Gauge value.
    ///
    /// # Panics
    ///
    /// Panics if the metric is not a gauge.
    pub fn float64(&self) -> f64 {
        assert_eq!(
            self.kind,
            MetricKind::Gauge,
            "float64() called on {} metric {:?}",
            self.kind,
            self.name
        );
        f64::from_bits(self.bits)
    }

    /// Check if this is the zero value
    pub fn is_zero(&self) -> bool {
        *self == Metric::default()
    }

    /// Add a counter delta, producing a new counter. Overflow wraps.
    pub fn accumulate(&self, delta: &Metric) -> Metric {
        Metric::counter(self.name.clone(), self.int64().wrapping_add(delta.int64()))
    }

    /// Binary form: kind tag, name, raw 8-byte value
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.kind == MetricKind::Unknown {
            return Err(TallyError::Encoding(format!(
                "metric {:?} has no kind",
                self.name
            )));
        }
        if self.name.is_empty() {
            return Err(TallyError::Encoding("metric has an empty name".into()));
        }
        if self.kind == MetricKind::Gauge && !self.float64().is_finite() {
            return Err(TallyError::Encoding(format!(
                "gauge {} has non-finite value {}",
                self.name,
                self.float64()
            )));
        }

        let payload = Payload {
            kind: self.kind.tag(),
            name: Cow::Borrowed(&self.name),
            bits: self.bits,
        };
        payload_options()
            .serialize(&payload)
            .map_err(|e| TallyError::Encoding(e.to_string()))
    }

    /// Parse the binary form produced by [`Metric::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let payload: Payload<'_> = payload_options()
            .deserialize(data)
            .map_err(|e| TallyError::CorruptRecord(format!("invalid metric payload: {e}")))?;

        let kind = MetricKind::from_tag(payload.kind).ok_or_else(|| {
            TallyError::CorruptRecord(format!("invalid metric kind tag: {}", payload.kind))
        })?;
        if payload.name.is_empty() {
            return Err(TallyError::CorruptRecord("metric payload has empty name".into()));
        }
        if kind == MetricKind::Gauge && !f64::from_bits(payload.bits).is_finite() {
            return Err(TallyError::CorruptRecord(format!(
                "gauge {} has non-finite value",
                payload.name
            )));
        }

        Ok(Self {
            kind,
            name: payload.name.into_owned(),
            bits: payload.bits,
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MetricKind::Counter => write!(f, "{}", self.int64()),
            MetricKind::Gauge => write!(f, "{}", self.float64()),
            MetricKind::Unknown => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Payload<'a> {
    kind: u8,
    #[serde(borrow)]
    name: Cow<'a, str>,
    bits: u64,
}

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}
