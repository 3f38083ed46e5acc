//! Structured overrides and artifact assembly.

use std::collections::BTreeMap;
use std::time::Instant;

use cosmo_core::{labels::REVISION_LABEL, AppConfig, ChainConfig, CosmosFullNode};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use metrics::{counter, histogram};
use toml::Value;
use tracing::{debug, warn};

use crate::defaults::default_document;
use crate::merge::merge_into;
use crate::{ArtifactKind, Document, ExternalConfig, OverlayError};

/// Rendered artifacts keyed by file name.
pub type ArtifactBundle = BTreeMap<String, String>;

/// Compile both overlays for `crd`. Fails as a whole if either artifact fails.
pub fn build_artifacts(crd: &CosmosFullNode, ext: &dyn ExternalConfig) -> Result<ArtifactBundle, OverlayError> {
    let t0 = Instant::now();
    counter!("overlay_assemble_total", 1u64);
    let res = assemble(&crd.spec.chain, ext);
    match &res {
        Ok(_) => {
            histogram!("overlay_assemble_ms", t0.elapsed().as_secs_f64() * 1000.0);
            debug!(name = %crd.app_name(), ns = %crd.namespace(), "overlays assembled");
        }
        Err(e) => {
            counter!("overlay_assemble_err", 1u64);
            warn!(name = %crd.app_name(), artifact = %e.artifact(), error = %e, "overlay assembly failed");
        }
    }
    res
}

fn assemble(chain: &ChainConfig, ext: &dyn ExternalConfig) -> Result<ArtifactBundle, OverlayError> {
    let mut bundle = ArtifactBundle::new();
    let tm = tendermint_overrides(chain, ext);
    bundle.insert(
        ArtifactKind::Tendermint.file_name().to_string(),
        render(ArtifactKind::Tendermint, &tm, chain.tendermint.toml_overrides.as_deref())?,
    );
    let app = app_overrides(&chain.app)?;
    bundle.insert(
        ArtifactKind::App.file_name().to_string(),
        render(ArtifactKind::App, &app, chain.app.toml_overrides.as_deref())?,
    );
    Ok(bundle)
}

/// ConfigMap carrying both overlays, named after the full node. The revision
/// label changes whenever any rendered byte does.
pub fn build_config_map(crd: &CosmosFullNode, ext: &dyn ExternalConfig) -> Result<ConfigMap, OverlayError> {
    let data = build_artifacts(crd, ext)?;
    let mut labels = cosmo_core::default_labels(crd);
    labels.insert(REVISION_LABEL.to_string(), cosmo_core::revision_hash(&data));
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(crd.app_name().to_string()),
            namespace: Some(crd.namespace().to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Defaults, then `structured`, then the parsed `free_form` text, serialized.
pub fn render(kind: ArtifactKind, structured: &Document, free_form: Option<&str>) -> Result<String, OverlayError> {
    let doc = overlay(kind, structured, free_form)?;
    toml::to_string(&doc).map_err(|source| OverlayError::Serialize { artifact: kind, source })
}

fn overlay(kind: ArtifactKind, structured: &Document, free_form: Option<&str>) -> Result<Document, OverlayError> {
    let mut doc = default_document(kind)?.clone();
    merge_into(&mut doc, structured);
    if let Some(text) = free_form {
        let decoded: Document = toml::from_str(text).map_err(|source| OverlayError::ConfigParse { artifact: kind, source })?;
        merge_into(&mut doc, &decoded);
    }
    Ok(doc)
}

/// Tendermint `config.toml` keys driven by the resource. Optional fields are
/// only present when set.
pub fn tendermint_overrides(chain: &ChainConfig, ext: &dyn ExternalConfig) -> Document {
    let mut base = Document::new();
    if let Some(v) = &chain.log_level {
        base.insert("log_level".into(), Value::String(v.clone()));
    }
    if let Some(v) = &chain.log_format {
        base.insert("log_format".into(), Value::String(v.clone()));
    }

    let tm = &chain.tendermint;
    let mut p2p = Document::new();
    p2p.insert("persistent_peers".into(), Value::String(tm.persistent_peers.clone()));
    p2p.insert("seeds".into(), Value::String(tm.seeds.clone()));
    if let Some(v) = tm.max_inbound_peers {
        p2p.insert("max_num_inbound_peers".into(), Value::Integer(i64::from(v)));
    }
    if let Some(v) = tm.max_outbound_peers {
        p2p.insert("max_num_outbound_peers".into(), Value::Integer(i64::from(v)));
    }
    if let Some(v) = ext.p2p_external_address() {
        p2p.insert("external_address".into(), Value::String(v));
    }
    base.insert("p2p".into(), Value::Table(p2p));

    if let Some(origins) = &tm.cors_allowed_origins {
        let mut rpc = Document::new();
        rpc.insert(
            "cors_allowed_origins".into(),
            Value::Array(origins.iter().cloned().map(Value::String).collect()),
        );
        base.insert("rpc".into(), Value::Table(rpc));
    }
    base
}

/// Cosmos SDK `app.toml` keys driven by the resource.
pub fn app_overrides(app: &AppConfig) -> Result<Document, OverlayError> {
    let mut base = Document::new();
    base.insert("minimum-gas-prices".into(), Value::String(app.min_gas_price.clone()));

    // "enabled-unsafe-cors" vs "enable-unsafe-cors" mirrors app.toml itself.
    let mut api = Document::new();
    api.insert("enabled-unsafe-cors".into(), Value::Boolean(app.api_enable_unsafe_cors));
    base.insert("api".into(), Value::Table(api));
    let mut grpc_web = Document::new();
    grpc_web.insert("enable-unsafe-cors".into(), Value::Boolean(app.grpc_web_enable_unsafe_cors));
    base.insert("grpc-web".into(), Value::Table(grpc_web));

    if let Some(h) = app.halt_height {
        let v = i64::try_from(h).map_err(|_| OverlayError::OutOfRange { artifact: ArtifactKind::App, field: "halt-height", value: h })?;
        base.insert("halt-height".into(), Value::Integer(v));
    }

    if let Some(pruning) = &app.pruning {
        // app.toml wants these as decimal strings
        let int_str = |n: Option<u32>| Value::String(n.unwrap_or(0).to_string());
        base.insert("pruning".into(), Value::String(pruning.strategy.as_str().to_string()));
        base.insert("pruning-interval".into(), int_str(pruning.interval));
        base.insert("pruning-keep-every".into(), int_str(pruning.keep_every));
        base.insert("pruning-keep-recent".into(), int_str(pruning.keep_recent));
    }
    Ok(base)
}
