//! Cosmos operator core types.
//!
//! Serde views over the two custom resources this workspace touches
//! (`CosmosFullNode` and `ScheduledVolumeSnapshot`) plus the label and
//! revision helpers shared by the overlay and snapshot crates. Only the fields
//! the configuration compiler and the snapshot lifecycle read are modelled;
//! unknown fields in a manifest are ignored.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub mod labels;

pub use labels::{default_labels, revision_hash, selector_labels};

/// API group shared by every resource of the operator.
pub const GROUP: &str = "cosmos.strange.love";

/// Group/version pair of a served resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    pub group: &'static str,
    pub version: &'static str,
}

impl GroupVersion {
    /// `group/version` as used in `apiVersion`.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// `cosmos.strange.love/v1`, home of `CosmosFullNode`.
pub const FULL_NODE_GV: GroupVersion = GroupVersion { group: GROUP, version: "v1" };
pub const FULL_NODE_KIND: &str = "CosmosFullNode";
pub const FULL_NODE_PLURAL: &str = "cosmosfullnodes";

/// `cosmos.strange.love/v1alpha1`, home of `ScheduledVolumeSnapshot`.
pub const SNAPSHOT_GV: GroupVersion = GroupVersion { group: GROUP, version: "v1alpha1" };
pub const SNAPSHOT_KIND: &str = "ScheduledVolumeSnapshot";

// ---------------- CosmosFullNode ----------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CosmosFullNode {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: FullNodeSpec,
}

impl CosmosFullNode {
    /// Name used for every owned resource (ConfigMap, selector labels).
    pub fn app_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullNodeSpec {
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Tendermint `log_level`, e.g. "info" or "debug".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Tendermint `log_format`, "plain" or "json".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    #[serde(default, rename = "config")]
    pub tendermint: TendermintConfig,
    #[serde(default)]
    pub app: AppConfig,
}

/// Fields mapped into Tendermint's `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TendermintConfig {
    /// Comma delimited `id@host:port` list.
    #[serde(default, rename = "peers")]
    pub persistent_peers: String,
    #[serde(default)]
    pub seeds: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inbound_peers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_outbound_peers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Raw TOML merged last over `config.toml`.
    #[serde(default, rename = "overrides", skip_serializing_if = "Option::is_none")]
    pub toml_overrides: Option<String>,
}

/// Fields mapped into the Cosmos SDK `app.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub min_gas_price: String,
    #[serde(default, rename = "apiEnableUnsafeCORS")]
    pub api_enable_unsafe_cors: bool,
    #[serde(default, rename = "grpcWebEnableUnsafeCORS")]
    pub grpc_web_enable_unsafe_cors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning: Option<Pruning>,
    /// Raw TOML merged last over `app.toml`.
    #[serde(default, rename = "overrides", skip_serializing_if = "Option::is_none")]
    pub toml_overrides: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pruning {
    pub strategy: PruningStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_every: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_recent: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PruningStrategy {
    #[default]
    Default,
    Nothing,
    Everything,
    Custom,
}

impl PruningStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruningStrategy::Default => "default",
            PruningStrategy::Nothing => "nothing",
            PruningStrategy::Everything => "everything",
            PruningStrategy::Custom => "custom",
        }
    }
}

/// Status entry written by a snapshot coordinator into
/// `CosmosFullNode.status.scheduledSnapshotStatus[<key>]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FullNodeSnapshotStatus {
    pub pod_candidate: String,
}

// ---------------- ScheduledVolumeSnapshot ----------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledVolumeSnapshot {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ScheduledVolumeSnapshotSpec,
    #[serde(default)]
    pub status: ScheduledVolumeSnapshotStatus,
}

impl ScheduledVolumeSnapshot {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Namespace of the referenced full node; an empty ref namespace means
    /// the snapshot's own namespace.
    pub fn full_node_namespace(&self) -> &str {
        let ns = self.spec.full_node_ref.namespace.as_str();
        if ns.is_empty() { self.namespace() } else { ns }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledVolumeSnapshotSpec {
    #[serde(default)]
    pub full_node_ref: ObjectRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledVolumeSnapshotStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<SnapshotCandidate>,
}

/// Pod (and its PVC) picked for deletion while the volume is snapshotted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCandidate {
    pub pod_name: String,
    #[serde(default)]
    pub pvc_name: String,
}
