//! Key lookup in job documents.
//!
//! Keys are dotted paths with optional array indices, e.g.
//! `execution.jobDocument.afr_ota.files[0].filepath`.

use std::borrow::Cow;

use serde_json::Value;

use crate::error::JobError;

/// Read access to a parsed job document.
pub trait DocumentQuery {
    /// Value at `key`. Strings yield their contents; any other value its
    /// compact JSON text.
    fn search(&self, key: &str) -> Option<Cow<'_, str>>;
}

/// A job document parsed with `serde_json`.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    root: Value,
}

impl JsonDocument {
    pub fn parse(text: &[u8]) -> Result<Self, JobError> {
        serde_json::from_slice(text)
            .map(|root| Self { root })
            .map_err(|_| JobError::InvalidJson)
    }

    /// Raw value at `key`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in key.split('.') {
            let (name, mut indices) = match segment.find('[') {
                Some(pos) => (&segment[..pos], &segment[pos..]),
                None => (segment, ""),
            };
            if !name.is_empty() {
                node = node.as_object()?.get(name)?;
            }
            while let Some(after) = indices.strip_prefix('[') {
                let close = after.find(']')?;
                let index: usize = after[..close].parse().ok()?;
                node = node.as_array()?.get(index)?;
                indices = &after[close + 1..];
            }
            if !indices.is_empty() {
                return None;
            }
        }
        Some(node)
    }

    pub fn str_at(&self, key: &str) -> Option<&str> {
        self.value(key)?.as_str()
    }

    pub fn u64_at(&self, key: &str) -> Option<u64> {
        self.value(key)?.as_u64()
    }
}

impl DocumentQuery for JsonDocument {
    fn search(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.value(key)? {
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}
