//! Cosmos kubehub: the narrow slice of the cluster API the snapshot lifecycle
//! needs. Status patches on `CosmosFullNode` and listing the pods it controls,
//! behind traits so callers can be exercised without a cluster.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use cosmo_core::{FULL_NODE_GV, FULL_NODE_KIND, FULL_NODE_PLURAL};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use tokio::sync::OnceCell;
use tracing::debug;

pub mod patch;

pub use patch::{JsonPatch, JsonPointer, PatchOp};

/// Errors talking to the API server. All are safe to retry except
/// `InvalidPointer`, which is a caller bug.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    /// A `remove` addressed a path that does not exist on the object.
    #[error("patch path not found: {0}")]
    PathNotFound(String),
    #[error("invalid json pointer below {0:?}: empty segment")]
    InvalidPointer(String),
    #[error("encoding patch")]
    Encode(#[from] serde_json::Error),
}

/// Namespaced object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Patches the status subresource of a `CosmosFullNode`.
#[async_trait]
pub trait StatusPatcher: Send + Sync {
    /// JSON merge patch; `patch` is the full object shape, e.g. `{"status": {...}}`.
    async fn merge_status(&self, target: &ObjectKey, patch: &serde_json::Value) -> Result<(), StoreError>;

    /// RFC 6902 patch. A `remove` of a missing path yields `StoreError::PathNotFound`.
    async fn json_patch_status(&self, target: &ObjectKey, patch: &JsonPatch) -> Result<(), StoreError>;
}

/// Lists pods controlled by a `CosmosFullNode`.
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_owned_pods(&self, namespace: &str, owner: &str) -> Result<Vec<Pod>, StoreError>;
}

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide client from the ambient kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client, StoreError> {
    let client = CLIENT.get_or_try_init(Client::try_default).await?;
    Ok(client.clone())
}

pub fn full_node_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(FULL_NODE_GV.group, FULL_NODE_GV.version, FULL_NODE_KIND);
    ApiResource::from_gvk_with_plural(&gvk, FULL_NODE_PLURAL)
}

/// True if `pod`'s controller owner reference is the full node `owner`.
pub fn is_controlled_by(pod: &Pod, owner: &str) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|ors| ors.iter().any(|o| o.controller == Some(true) && o.kind == FULL_NODE_KIND && o.name == owner))
        .unwrap_or(false)
}

/// Whole namespace. Ownership is the only filter: a pod missing the usual
/// labels still belongs to its controller.
fn pod_list_params() -> ListParams {
    ListParams::default()
}

/// Pods in `pods` whose controller is the full node `owner`.
pub fn owned_pods(pods: Vec<Pod>, owner: &str) -> Vec<Pod> {
    pods.into_iter().filter(|p| is_controlled_by(p, owner)).collect()
}

/// Default implementation using kube-rs client APIs.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(get_kube_client().await?))
    }

    fn full_nodes(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &full_node_resource())
    }
}

#[async_trait]
impl StatusPatcher for KubeStore {
    async fn merge_status(&self, target: &ObjectKey, patch: &serde_json::Value) -> Result<(), StoreError> {
        let api = self.full_nodes(&target.namespace);
        let _ = api.patch_status(&target.name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        debug!(target = %target, "status merge patch applied");
        Ok(())
    }

    async fn json_patch_status(&self, target: &ObjectKey, patch: &JsonPatch) -> Result<(), StoreError> {
        let api = self.full_nodes(&target.namespace);
        let kube_patch = patch.to_kube()?;
        match api.patch_status(&target.name, &PatchParams::default(), &Patch::Json::<()>(kube_patch)).await {
            Ok(_) => {
                debug!(target = %target, ops = patch.ops().len(), "status json patch applied");
                Ok(())
            }
            Err(e) => Err(classify_json_patch_error(e, patch)),
        }
    }
}

#[async_trait]
impl PodLister for KubeStore {
    async fn list_owned_pods(&self, namespace: &str, owner: &str) -> Result<Vec<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&pod_list_params()).await?;
        let total = pods.items.len();
        let owned = owned_pods(pods.items, owner);
        debug!(ns = %namespace, owner = %owner, total, owned = owned.len(), "listed pods");
        Ok(owned)
    }
}

/// The API server answers a `remove` of a missing path with 422 and a
/// "nonexistent"/"missing" message from its JSON patch library.
fn classify_json_patch_error(e: kube::Error, patch: &JsonPatch) -> StoreError {
    if let kube::Error::Api(ae) = &e {
        let msg = ae.message.to_ascii_lowercase();
        if ae.code == 422 && (msg.contains("nonexistent") || msg.contains("missing")) {
            let path = patch
                .ops()
                .iter()
                .map(|op| match op {
                    PatchOp::Remove { path } => path.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            return StoreError::PathNotFound(path);
        }
    }
    StoreError::Kube(e)
}
