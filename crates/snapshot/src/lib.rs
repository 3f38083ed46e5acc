//! Cosmos snapshot lifecycle: take a full node's pod out of service while its
//! volume is snapshotted, then bring it back.
//!
//! A `ScheduledVolumeSnapshot` drives its referenced `CosmosFullNode` through
//!
//! ```text
//! Idle -> DeletionRequested -> DeletionConfirmed -> RestorationRequested -> Idle
//! ```
//!
//! by writing and removing an entry in the full node's
//! `status.scheduledSnapshotStatus`, keyed by [`source_key`]. The full node's
//! own controller reads those entries and deletes or recreates the pod. Every
//! method here is a single attempt against the API server with no state kept
//! between calls; retrying is up to the caller. Dropping a returned future
//! cancels the call, and a patch either applies fully or not at all.

#![forbid(unsafe_code)]

use cosmo_core::{FullNodeSnapshotStatus, ScheduledVolumeSnapshot, SnapshotCandidate};
use cosmo_kubehub::{JsonPatch, JsonPointer, ObjectKey, PodLister, StatusPatcher, StoreError};
use metrics::counter;
use tracing::{debug, info, warn};

pub mod key;

pub use key::{coordination_key, source_key};

const STATUS_FIELD: &str = "status";
const SNAPSHOT_STATUS_FIELD: &str = "scheduledSnapshotStatus";

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Caller contract breach: the snapshot has no pod candidate yet.
    /// Retrying cannot fix it.
    #[error("scheduled volume snapshot {snapshot} has no pod candidate")]
    Precondition { snapshot: String },
    /// Candidate pod still exists; expected until the full node controller
    /// has removed it.
    #[error("pod {pod} not deleted yet")]
    NotYetDeleted { pod: String },
    #[error(transparent)]
    Transient(StoreError),
    /// Coordination key could not form a patch path.
    #[error("invalid coordination key")]
    InvalidKey(#[source] StoreError),
}

impl SignalError {
    /// Whether the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SignalError::NotYetDeleted { .. } | SignalError::Transient(_))
    }
}

/// Manages a `ScheduledVolumeSnapshot`'s `spec.fullNodeRef`.
pub struct FullNodeControl<S, L> {
    status_client: S,
    list_client: L,
}

impl<S: StatusPatcher, L: PodLister> FullNodeControl<S, L> {
    pub fn new(status_client: S, list_client: L) -> Self {
        Self { status_client, list_client }
    }

    /// Ask the full node to delete the candidate pod so the snapshot sees a
    /// quiesced data directory. Merge-patches our entry into the full node's
    /// status, leaving other coordinators' entries alone.
    pub async fn signal_pod_deletion(&self, crd: &ScheduledVolumeSnapshot) -> Result<(), SignalError> {
        let candidate = candidate(crd)?;
        let target = full_node_ref(crd);
        let key = source_key(crd);
        let entry = FullNodeSnapshotStatus { pod_candidate: candidate.pod_name.clone() };
        let patch = serde_json::json!({
            STATUS_FIELD: { SNAPSHOT_STATUS_FIELD: { key.as_str(): entry } }
        });
        if let Err(e) = self.status_client.merge_status(&target, &patch).await {
            counter!("snapshot_signal_err", 1u64);
            warn!(target = %target, key = %key, error = %e, "signal pod deletion failed");
            return Err(SignalError::Transient(e));
        }
        counter!("snapshot_signal_delete_total", 1u64);
        info!(target = %target, key = %key, pod = %candidate.pod_name, "signaled pod deletion");
        Ok(())
    }

    /// `Ok` once no pod owned by the full node carries the candidate's name.
    pub async fn confirm_pod_deletion(&self, crd: &ScheduledVolumeSnapshot) -> Result<(), SignalError> {
        let candidate = candidate(crd)?;
        let target = full_node_ref(crd);
        let pods = self.list_client.list_owned_pods(&target.namespace, &target.name).await.map_err(|e| {
            counter!("snapshot_signal_err", 1u64);
            warn!(target = %target, error = %e, "list pods failed");
            SignalError::Transient(e)
        })?;
        if pods.iter().any(|p| p.metadata.name.as_deref() == Some(candidate.pod_name.as_str())) {
            counter!("snapshot_confirm_pending_total", 1u64);
            debug!(target = %target, pod = %candidate.pod_name, "candidate still present");
            return Err(SignalError::NotYetDeleted { pod: candidate.pod_name.clone() });
        }
        debug!(target = %target, pod = %candidate.pod_name, "candidate deletion confirmed");
        Ok(())
    }

    /// Remove our entry so the full node recreates the pod. An entry that is
    /// already gone counts as success.
    pub async fn signal_pod_restoration(&self, crd: &ScheduledVolumeSnapshot) -> Result<(), SignalError> {
        let target = full_node_ref(crd);
        let key = source_key(crd);
        let path = entry_path(&key).map_err(SignalError::InvalidKey)?;
        let patch = JsonPatch::new().remove(path);
        match self.status_client.json_patch_status(&target, &patch).await {
            Ok(()) => {}
            Err(StoreError::PathNotFound(p)) => {
                debug!(target = %target, path = %p, "snapshot status entry already absent");
            }
            Err(e) => {
                counter!("snapshot_signal_err", 1u64);
                warn!(target = %target, key = %key, error = %e, "signal pod restoration failed");
                return Err(SignalError::Transient(e));
            }
        }
        counter!("snapshot_signal_restore_total", 1u64);
        info!(target = %target, key = %key, "signaled pod restoration");
        Ok(())
    }
}

/// `/status/scheduledSnapshotStatus/<key>`
pub fn entry_path(key: &str) -> Result<JsonPointer, StoreError> {
    JsonPointer::root().push(STATUS_FIELD)?.push(SNAPSHOT_STATUS_FIELD)?.push(key)
}

fn candidate(crd: &ScheduledVolumeSnapshot) -> Result<&SnapshotCandidate, SignalError> {
    match crd.status.candidate.as_ref() {
        Some(c) if !c.pod_name.is_empty() => Ok(c),
        _ => Err(SignalError::Precondition { snapshot: format!("{}/{}", crd.namespace(), crd.name()) }),
    }
}

fn full_node_ref(crd: &ScheduledVolumeSnapshot) -> ObjectKey {
    ObjectKey::new(crd.full_node_namespace(), crd.spec.full_node_ref.name.clone())
}
