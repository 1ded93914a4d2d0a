//! The document identifier model.
//!
//! Identifiers are the 12-byte ObjectIds of `bson::oid`, rendered as 24
//! lowercase hex characters. Equality is over the byte sequence. This
//! module adds the validated parse from user-supplied strings.

use bson::oid::ObjectId;

use crate::error::{Error, Result};

/// Parses a 24-hex-character string into an ObjectId. Wrong length or
/// non-hex characters fail with the invalid-identifier code.
pub fn parse_object_id(hex: &str) -> Result<ObjectId> {
    if hex.len() != 24 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidObjectId(format!(
            "an ObjectId is 24 hex characters, got {:?}",
            hex
        )));
    }
    ObjectId::with_string(hex)
        .map_err(|err| Error::InvalidObjectId(format!("invalid ObjectId {:?}: {}", hex, err)))
}
