//! Job payloads: a scalar body or an ordered key/value form.

use serde_json::{Map, Value};

use crate::error::Error;

use super::JobId;

/// Data bound into the request template for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw body (or raw query string for GET-like methods).
    Body(String),
    /// Key/value pairs in insertion order.
    Form(Vec<(String, String)>),
}

impl Payload {
    pub fn body(s: impl Into<String>) -> Self {
        Payload::Body(s.into())
    }

    pub fn form<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Payload::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Body(s) => s.is_empty(),
            Payload::Form(pairs) => pairs.is_empty(),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Body(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Body(s)
    }
}

/// Textual form of a JSON scalar, or None for compound values and null.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn form_from_object(map: Map<String, Value>) -> Result<Payload, Error> {
    let mut pairs = Vec::with_capacity(map.len());
    for (k, v) in map {
        let text = scalar_text(&v).ok_or_else(|| {
            Error::InvalidJobData(format!("form field {:?} is not a scalar: {}", k, v))
        })?;
        pairs.push((k, text));
    }
    Ok(Payload::Form(pairs))
}

impl TryFrom<Value> for Payload {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => form_from_object(map),
            other => scalar_text(&other)
                .map(Payload::Body)
                .ok_or_else(|| Error::InvalidJobData(other.to_string())),
        }
    }
}

/// Several jobs submitted in one call.
///
/// An array is a batch of auto-named jobs (its indices are default keys, not
/// names); an object is a batch of explicitly named jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobBatch {
    Auto(Vec<Payload>),
    Named(Vec<(JobId, Payload)>),
}

impl JobBatch {
    pub fn len(&self) -> usize {
        match self {
            JobBatch::Auto(v) => v.len(),
            JobBatch::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into `(name, payload)` pairs; `None` means "assign automatically".
    pub fn into_entries(self) -> Vec<(Option<JobId>, Payload)> {
        match self {
            JobBatch::Auto(v) => v.into_iter().map(|p| (None, p)).collect(),
            JobBatch::Named(v) => v.into_iter().map(|(id, p)| (Some(id), p)).collect(),
        }
    }
}

impl TryFrom<Value> for JobBatch {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(Payload::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(JobBatch::Auto),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Payload::try_from(v).map(|p| (JobId::Named(k), p)))
                .collect::<Result<Vec<_>, _>>()
                .map(JobBatch::Named),
            other => Err(Error::InvalidJobData(format!(
                "job batch must be an array or object, got {}",
                other
            ))),
        }
    }
}
