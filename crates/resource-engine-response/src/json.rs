//! JSON:API document body formatting.

use resource_engine_core::wire::Document;
use resource_engine_core::Error;

/// Serialize a document as the JSON:API response body.
pub fn format_document(document: &Document) -> Result<bytes::Bytes, serde_json::Error> {
    let json = serde_json::to_vec(document)?;
    Ok(bytes::Bytes::from(json))
}

/// Serialize an engine error as a JSON:API `{"errors": [...]}` body
/// (§7 "error propagation").
pub fn format_error(error: &Error) -> bytes::Bytes {
    // `Error::to_json` builds from typed fields; this can't fail to
    // serialize.
    let json = error.to_json();
    bytes::Bytes::from(serde_json::to_vec(&json).expect("error document always serializes"))
}
