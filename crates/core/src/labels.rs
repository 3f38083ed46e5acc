//! Labels and selectors stamped on resources owned by a `CosmosFullNode`.

use std::collections::BTreeMap;

use crate::CosmosFullNode;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";
pub const CREATED_BY: &str = "cosmos-operator";
/// Revision of a generated resource, hex FNV-1a of its content.
pub const REVISION_LABEL: &str = "cosmosfullnode.cosmos.strange.love/resource-revision";

/// Labels shared by every resource generated for `crd`.
pub fn default_labels(crd: &CosmosFullNode) -> BTreeMap<String, String> {
    let mut labels = selector_labels(crd.app_name());
    labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY.to_string());
    labels
}

/// Labels a Service or workload selects the node's pods by.
pub fn selector_labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), app_name.to_string());
    labels
}

/// 32-bit FNV-1a over key/value pairs, hex encoded. Order follows the map, so
/// equal maps always hash equal.
pub fn revision_hash(data: &BTreeMap<String, String>) -> String {
    let mut h: u32 = 0x811c9dc5;
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            h ^= *b as u32;
            h = h.wrapping_mul(0x01000193);
        }
    };
    for (k, v) in data {
        feed(k.as_bytes());
        feed(&[0]);
        feed(v.as_bytes());
        feed(&[0]);
    }
    format!("{:08x}", h)
}
