//! Structured RFC 6902 patches over escaped RFC 6901 pointers.
//!
//! Paths are assembled from segments and escaped on render, so a segment can
//! never introduce extra path levels.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::StoreError;

/// JSON pointer built segment by segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPointer {
    segments: Vec<String>,
}

impl JsonPointer {
    pub fn root() -> Self {
        Self::default()
    }

    /// Append one segment. Empty segments are rejected: no key we address is
    /// empty, so one indicates a bug upstream.
    pub fn push(mut self, segment: impl Into<String>) -> Result<Self, StoreError> {
        let segment = segment.into();
        if segment.is_empty() {
            return Err(StoreError::InvalidPointer(self.to_string()));
        }
        self.segments.push(segment);
        Ok(self)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            // order matters: '~' first so the '~1' we emit is not re-escaped
            write!(f, "/{}", seg.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl Serialize for JsonPointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Remove { path: JsonPointer },
}

/// Ordered list of patch operations, applied atomically by the API server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JsonPatch(Vec<PatchOp>);

impl JsonPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(mut self, path: JsonPointer) -> Self {
        self.0.push(PatchOp::Remove { path });
        self
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.0
    }

    /// Convert into the `json_patch` representation kube expects.
    pub fn to_kube(&self) -> Result<json_patch::Patch, StoreError> {
        let v = serde_json::to_value(self)?;
        Ok(serde_json::from_value(v)?)
    }
}
