//! Cosmos overlay compiler: defaults + resource fields + free-form TOML.
//!
//! Every full node gets two files mounted into its containers, an overlay for
//! Tendermint's `config.toml` and one for the Cosmos SDK `app.toml`. Each is
//! compiled in three layers, later layers winning key by key:
//!
//! 1. embedded defaults ([`defaults`]), parsed once per process
//! 2. structured overrides built from typed `CosmosFullNode` fields
//! 3. the user's free-form `overrides` TOML, if any
//!
//! [`build_artifacts`] returns the rendered files keyed by name and
//! [`build_config_map`] wraps them into the ConfigMap the node mounts.

#![forbid(unsafe_code)]

use std::fmt;

pub mod assemble;
pub mod defaults;
pub mod merge;

pub use assemble::{app_overrides, build_artifacts, build_config_map, render, tendermint_overrides, ArtifactBundle};
pub use merge::{merge, Document};

/// Artifact name of the Tendermint overlay.
pub const CONFIG_OVERLAY_FILE: &str = "config-overlay.toml";
/// Artifact name of the Cosmos SDK overlay.
pub const APP_OVERLAY_FILE: &str = "app-overlay.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Tendermint `config.toml`.
    Tendermint,
    /// Cosmos SDK `app.toml`.
    App,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Tendermint, ArtifactKind::App];

    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Tendermint => CONFIG_OVERLAY_FILE,
            ArtifactKind::App => APP_OVERLAY_FILE,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Tendermint => f.write_str("tendermint"),
            ArtifactKind::App => f.write_str("app"),
        }
    }
}

/// Errors compiling an overlay. Every variant names the artifact it aborted.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid toml in {artifact} overrides: {source}")]
    ConfigParse {
        artifact: ArtifactKind,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid embedded {artifact} defaults: {source}")]
    Default {
        artifact: ArtifactKind,
        #[source]
        source: toml::de::Error,
    },
    #[error("encoding {artifact} toml: {source}")]
    Serialize {
        artifact: ArtifactKind,
        #[source]
        source: toml::ser::Error,
    },
    #[error("{artifact} field {field} out of range: {value}")]
    OutOfRange {
        artifact: ArtifactKind,
        field: &'static str,
        value: u64,
    },
}

impl OverlayError {
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            OverlayError::ConfigParse { artifact, .. }
            | OverlayError::Default { artifact, .. }
            | OverlayError::Serialize { artifact, .. }
            | OverlayError::OutOfRange { artifact, .. } => *artifact,
        }
    }
}

/// Configuration pulled from kubernetes or other sources rather than the
/// `CosmosFullNode` itself.
pub trait ExternalConfig: Send + Sync {
    /// Address peers should dial, `None` when not (yet) known. Never `Some("")`.
    fn p2p_external_address(&self) -> Option<String>;
}

/// Fixed external address, e.g. resolved by the caller from a Service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalAddress(pub Option<String>);

impl ExternalConfig for ExternalAddress {
    fn p2p_external_address(&self) -> Option<String> {
        self.0.clone().filter(|s| !s.is_empty())
    }
}
