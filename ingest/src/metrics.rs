use serde::Serialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// characters reserved as separators in derived identifiers (`bench.metric`, `a,b`, ...)
pub const RESERVED_CHARACTERS: [char; 3] = ['.', ' ', ','];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("name '{0}' cannot contain dots, spaces or commas")]
    InvalidName(String),
    #[error("unknown metric type '{0}', expected int or float")]
    UnknownType(String),
    #[error("value '{value}' is not a valid {kind}")]
    InvalidValue { value: String, kind: MetricType },
}

pub(crate) fn validate_name(name: &str) -> Result<(), MetricError> {
    if name.is_empty() || name.contains(RESERVED_CHARACTERS) {
        Err(MetricError::InvalidName(name.to_owned()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Int,
    Float,
}

impl FromStr for MetricType {
    type Err = MetricError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            other => Err(MetricError::UnknownType(other.to_owned())),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
        }
    }
}

/// A parsed metric value, typed after its declaration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn parse(text: &str, kind: MetricType) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            value: text.to_owned(),
            kind,
        };

        match kind {
            MetricType::Int => text.trim().parse().map(Self::Int).map_err(|_| invalid()),
            MetricType::Float => text.trim().parse().map(Self::Float).map_err(|_| invalid()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    /// ordering used by the max/min reductions, ints compare exactly
    pub fn max(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a.max(b)),
            (a, b) => Self::Float(a.as_f64().max(b.as_f64())),
        }
    }

    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a.min(b)),
            (a, b) => Self::Float(a.as_f64().min(b.as_f64())),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
}

impl MetricDeclaration {
    pub fn new(name: impl Into<String>, kind: MetricType) -> Result<Self, MetricError> {
        let name = name.into();
        validate_name(&name)?;

        Ok(Self { name, kind })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkDeclaration {
    pub name: String,
    pub metrics: Vec<MetricDeclaration>,
}

impl BenchmarkDeclaration {
    pub fn new(
        name: impl Into<String>,
        metrics: Vec<MetricDeclaration>,
    ) -> Result<Self, MetricError> {
        let name = name.into();
        validate_name(&name)?;

        Ok(Self { name, metrics })
    }

    pub fn metric(&self, name: &str) -> Option<&MetricDeclaration> {
        self.metrics.iter().find(|metric| metric.name == name)
    }
}

/// One iteration worth of raw metric values for a benchmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsMeasurement {
    pub benchmark: String,
    pub iteration: u64,
    pub values: Vec<(String, String)>,
}

impl MetricsMeasurement {
    pub fn value(&self, metric: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == metric)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for MetricsMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@[{}]:{} ", self.benchmark, self.iteration)?;

        for (index, (name, value)) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }

        Ok(())
    }
}
