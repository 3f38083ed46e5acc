//! Coordination keys addressing one entry in
//! `CosmosFullNode.status.scheduledSnapshotStatus`.

use cosmo_core::{ScheduledVolumeSnapshot, SNAPSHOT_GV};

const SEPARATOR: &str = ".";

/// Join the requester's identity and drop every `/`. The key becomes a JSON
/// patch path segment, so it must never contain one.
pub fn coordination_key(namespace: &str, name: &str, group: &str, version: &str) -> String {
    [namespace, name, version, group].join(SEPARATOR).replace('/', "")
}

/// Key for `crd`, identical across deletion and restoration.
pub fn source_key(crd: &ScheduledVolumeSnapshot) -> String {
    coordination_key(crd.namespace(), crd.name(), SNAPSHOT_GV.group, SNAPSHOT_GV.version)
}
