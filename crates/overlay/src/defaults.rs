//! Embedded default documents, decoded once per process and shared read-only.

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::{ArtifactKind, Document, OverlayError};

const TENDERMINT_DEFAULT_TOML: &str = include_str!("../toml/tendermint_default_config.toml");
const APP_DEFAULT_TOML: &str = include_str!("../toml/app_default_config.toml");

static TENDERMINT_DEFAULT: OnceCell<Document> = OnceCell::new();
static APP_DEFAULT: OnceCell<Document> = OnceCell::new();

/// Default document for `kind`. Callers must copy before merging.
pub fn default_document(kind: ArtifactKind) -> Result<&'static Document, OverlayError> {
    let (cell, raw) = match kind {
        ArtifactKind::Tendermint => (&TENDERMINT_DEFAULT, TENDERMINT_DEFAULT_TOML),
        ArtifactKind::App => (&APP_DEFAULT, APP_DEFAULT_TOML),
    };
    cell.get_or_try_init(|| {
        let doc: Document = toml::from_str(raw).map_err(|source| OverlayError::Default { artifact: kind, source })?;
        debug!(artifact = %kind, keys = doc.len(), "default document loaded");
        Ok(doc)
    })
}
