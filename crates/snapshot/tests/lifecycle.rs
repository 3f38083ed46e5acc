#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use cosmo_core::{ScheduledVolumeSnapshot, SnapshotCandidate, FULL_NODE_GV, FULL_NODE_KIND};
use cosmo_kubehub::{owned_pods, JsonPatch, ObjectKey, PatchOp, PodLister, StatusPatcher, StoreError};
use cosmo_snapshot::{source_key, FullNodeControl, SignalError};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{json, Value};

/// In-memory stand-in for one `CosmosFullNode` and the cluster's pods.
#[derive(Default)]
struct FakeCluster {
    full_node: Mutex<Value>,
    pods: Mutex<Vec<Pod>>,
    targets: Mutex<Vec<ObjectKey>>,
    fail_status: AtomicBool,
    fail_list: AtomicBool,
    patches: AtomicUsize,
}

fn unavailable() -> StoreError {
    StoreError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".into(),
        message: "etcdserver: request timed out".into(),
        reason: "ServiceUnavailable".into(),
        code: 503,
    }))
}

fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(p) => {
            if !target.is_object() {
                *target = json!({});
            }
            if let Value::Object(t) = target {
                for (k, v) in p {
                    if v.is_null() {
                        t.remove(k);
                    } else {
                        merge_patch(t.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl FakeCluster {
    fn entries(&self) -> serde_json::Map<String, Value> {
        self.full_node.lock().unwrap()
            .pointer("/status/scheduledSnapshotStatus")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn add_pod(&self, name: &str, owner: &str) {
        let mut p = Pod::default();
        p.metadata.name = Some(name.to_string());
        p.metadata.owner_references = Some(vec![OwnerReference {
            api_version: FULL_NODE_GV.api_version(),
            kind: FULL_NODE_KIND.to_string(),
            name: owner.to_string(),
            uid: "00000000-0000-0000-0000-000000000001".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        self.pods.lock().unwrap().push(p);
    }

    fn label_pod(&self, name: &str, owner: &str) {
        for p in self.pods.lock().unwrap().iter_mut().filter(|p| p.metadata.name.as_deref() == Some(name)) {
            p.metadata.labels = Some(cosmo_core::selector_labels(owner));
        }
    }

    fn delete_pod(&self, name: &str) {
        self.pods.lock().unwrap().retain(|p| p.metadata.name.as_deref() != Some(name));
    }
}

#[async_trait::async_trait]
impl StatusPatcher for &FakeCluster {
    async fn merge_status(&self, target: &ObjectKey, patch: &Value) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());
        merge_patch(&mut self.full_node.lock().unwrap(), patch);
        Ok(())
    }

    async fn json_patch_status(&self, target: &ObjectKey, patch: &JsonPatch) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());
        let mut doc = self.full_node.lock().unwrap();
        // validate every op before touching the document: all or nothing
        let mut staged = doc.clone();
        for op in patch.ops() {
            match op {
                PatchOp::Remove { path } => {
                    let (last, parents) = path.segments().split_last().expect("non-root path");
                    let mut cur = &mut staged;
                    for seg in parents {
                        cur = cur.get_mut(seg.as_str()).ok_or_else(|| StoreError::PathNotFound(path.to_string()))?;
                    }
                    let removed = cur.as_object_mut().and_then(|m| m.remove(last.as_str()));
                    if removed.is_none() {
                        return Err(StoreError::PathNotFound(path.to_string()));
                    }
                }
            }
        }
        *doc = staged;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PodLister for &FakeCluster {
    async fn list_owned_pods(&self, _namespace: &str, owner: &str) -> Result<Vec<Pod>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(owned_pods(self.pods.lock().unwrap().clone(), owner))
    }
}

fn snapshot(name: &str, candidate: Option<&str>) -> ScheduledVolumeSnapshot {
    let mut crd = ScheduledVolumeSnapshot::default();
    crd.metadata.namespace = Some("default".into());
    crd.metadata.name = Some(name.into());
    crd.spec.full_node_ref.name = "osmosis".into();
    crd.status.candidate = candidate.map(|pod| SnapshotCandidate { pod_name: pod.into(), pvc_name: format!("pvc-{}", pod) });
    crd
}

#[tokio::test]
async fn full_cycle_returns_to_idle() {
    let cluster = FakeCluster::default();
    cluster.add_pod("osmosis-0", "osmosis");
    cluster.add_pod("osmosis-1", "osmosis");
    let control = FullNodeControl::new(&cluster, &cluster);
    let crd = snapshot("snap1", Some("osmosis-1"));

    // Idle -> DeletionRequested
    control.signal_pod_deletion(&crd).await.unwrap();
    let entries = cluster.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries["default.snap1.v1alpha1.cosmos.strange.love"], json!({"podCandidate": "osmosis-1"}));

    // not confirmed while the pod lives
    let err = control.confirm_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::NotYetDeleted { ref pod } if pod == "osmosis-1"));
    assert!(err.is_transient());
    assert_eq!(err.to_string(), "pod osmosis-1 not deleted yet");

    // DeletionRequested -> DeletionConfirmed
    cluster.delete_pod("osmosis-1");
    control.confirm_pod_deletion(&crd).await.unwrap();

    // -> RestorationRequested -> Idle
    control.signal_pod_restoration(&crd).await.unwrap();
    assert!(cluster.entries().is_empty());

    let targets = cluster.targets.lock().unwrap();
    assert!(targets.iter().all(|t| *t == ObjectKey::new("default", "osmosis")));
}

#[tokio::test]
async fn concurrent_requests_do_not_collide() {
    let cluster = FakeCluster::default();
    let control = FullNodeControl::new(&cluster, &cluster);
    let a = snapshot("daily", Some("osmosis-0"));
    let b = snapshot("hourly", Some("osmosis-1"));

    control.signal_pod_deletion(&a).await.unwrap();
    control.signal_pod_deletion(&b).await.unwrap();
    let entries = cluster.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[&source_key(&a)]["podCandidate"], "osmosis-0");
    assert_eq!(entries[&source_key(&b)]["podCandidate"], "osmosis-1");

    control.signal_pod_restoration(&a).await.unwrap();
    let entries = cluster.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key(&source_key(&b)));
}

#[tokio::test]
async fn restoration_is_idempotent() {
    let cluster = FakeCluster::default();
    let control = FullNodeControl::new(&cluster, &cluster);
    let crd = snapshot("snap1", Some("osmosis-0"));

    // never signaled: whole status map absent
    control.signal_pod_restoration(&crd).await.unwrap();

    control.signal_pod_deletion(&crd).await.unwrap();
    control.signal_pod_restoration(&crd).await.unwrap();
    control.signal_pod_restoration(&crd).await.unwrap();
    assert!(cluster.entries().is_empty());
}

#[tokio::test]
async fn restoration_does_not_need_candidate() {
    let cluster = FakeCluster::default();
    let control = FullNodeControl::new(&cluster, &cluster);
    control.signal_pod_deletion(&snapshot("snap1", Some("osmosis-0"))).await.unwrap();
    control.signal_pod_restoration(&snapshot("snap1", None)).await.unwrap();
    assert!(cluster.entries().is_empty());
}

#[tokio::test]
async fn missing_candidate_is_rejected_without_side_effects() {
    let cluster = FakeCluster::default();
    cluster.add_pod("osmosis-0", "osmosis");
    let control = FullNodeControl::new(&cluster, &cluster);
    let crd = snapshot("snap1", None);

    let err = control.signal_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::Precondition { .. }));
    assert!(!err.is_transient());
    let err = control.confirm_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::Precondition { .. }));
    assert_eq!(cluster.patches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn confirm_only_considers_owned_pods() {
    let cluster = FakeCluster::default();
    // same name, different owner
    cluster.add_pod("osmosis-0", "someone-else");
    let control = FullNodeControl::new(&cluster, &cluster);
    control.confirm_pod_deletion(&snapshot("snap1", Some("osmosis-0"))).await.unwrap();

    cluster.add_pod("osmosis-0", "osmosis");
    assert!(control.confirm_pod_deletion(&snapshot("snap1", Some("osmosis-0"))).await.is_err());
}

#[tokio::test]
async fn store_failures_are_transient() {
    let cluster = FakeCluster::default();
    let control = FullNodeControl::new(&cluster, &cluster);
    let crd = snapshot("snap1", Some("osmosis-0"));

    cluster.fail_status.store(true, Ordering::SeqCst);
    let err = control.signal_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::Transient(_)));
    assert!(err.is_transient());
    let err = control.signal_pod_restoration(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::Transient(_)));

    cluster.fail_list.store(true, Ordering::SeqCst);
    let err = control.confirm_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::Transient(_)));

    // caller retries once the store recovers
    cluster.fail_status.store(false, Ordering::SeqCst);
    control.signal_pod_deletion(&crd).await.unwrap();
    control.signal_pod_restoration(&crd).await.unwrap();
    assert!(cluster.entries().is_empty());
}

#[tokio::test]
async fn full_node_ref_namespace_wins() {
    let cluster = FakeCluster::default();
    let control = FullNodeControl::new(&cluster, &cluster);
    let mut crd = snapshot("snap1", Some("osmosis-0"));
    crd.spec.full_node_ref.namespace = "chains".into();
    control.signal_pod_deletion(&crd).await.unwrap();
    assert_eq!(cluster.targets.lock().unwrap()[0], ObjectKey::new("chains", "osmosis"));
    // key still derives from the snapshot's own identity
    assert!(cluster.entries().contains_key("default.snap1.v1alpha1.cosmos.strange.love"));
}

#[tokio::test]
async fn confirm_sees_owned_pod_without_labels() {
    let cluster = FakeCluster::default();
    cluster.add_pod("osmosis-0", "osmosis");
    cluster.label_pod("osmosis-0", "osmosis");
    // controlled by the full node but never labelled
    cluster.add_pod("osmosis-1", "osmosis");
    let control = FullNodeControl::new(&cluster, &cluster);
    let crd = snapshot("snap1", Some("osmosis-1"));

    let err = control.confirm_pod_deletion(&crd).await.unwrap_err();
    assert!(matches!(err, SignalError::NotYetDeleted { ref pod } if pod == "osmosis-1"));

    cluster.delete_pod("osmosis-1");
    control.confirm_pod_deletion(&crd).await.unwrap();
}
