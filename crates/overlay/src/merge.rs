//! Right-biased recursive merge of TOML documents.

use toml::{Table, Value};

/// Decoded TOML document.
pub type Document = Table;

/// Merge `overlay` over `base` and return the result; neither input is
/// touched. Tables present on both sides merge key by key, any other value in
/// `overlay` (scalar, array, or a table replacing a scalar) wins wholesale.
pub fn merge(base: &Document, overlay: &Document) -> Document {
    let mut out = base.clone();
    merge_into(&mut out, overlay);
    out
}

/// In-place variant of [`merge`]. Only ever called on a document the caller
/// owns, never on the shared defaults.
pub(crate) fn merge_into(dst: &mut Document, src: &Document) {
    for (k, v) in src {
        if let (Some(Value::Table(d)), Value::Table(s)) = (dst.get_mut(k), v) {
            merge_into(d, s);
            continue;
        }
        dst.insert(k.clone(), v.clone());
    }
}
