//! Wire (de)serialization of plan nodes and property maps.
//!
//! Both encodings are deterministic: plan nodes serialize field-by-field in
//! declaration order and properties are `BTreeMap`s, so identical inputs
//! yield byte-identical outputs across runs.

use std::collections::BTreeMap;

use msq_common::error::{MsqError, Result};

use crate::plan_node::PlanNode;

/// Serialize a fragment root to its compact wire form.
pub fn serialize_plan_node(node: &PlanNode) -> Result<Vec<u8>> {
    serde_json::to_vec(node).map_err(|e| MsqError::Serde(format!("plan node encode failed: {e}")))
}

/// Decode a fragment root from its wire form.
pub fn deserialize_plan_node(bytes: &[u8]) -> Result<PlanNode> {
    serde_json::from_slice(bytes)
        .map_err(|e| MsqError::Serde(format!("plan node decode failed: {e}")))
}

/// Serialize an opaque property map to its wire form.
pub fn serialize_properties(properties: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    serde_json::to_vec(properties)
        .map_err(|e| MsqError::Serde(format!("properties encode failed: {e}")))
}

/// Decode an opaque property map from its wire form.
pub fn deserialize_properties(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    serde_json::from_slice(bytes)
        .map_err(|e| MsqError::Serde(format!("properties decode failed: {e}")))
}
