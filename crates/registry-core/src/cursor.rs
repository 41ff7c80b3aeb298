//! Opaque pagination cursors.
//!
//! A cursor is the (name, version) of the last entry on a page, rendered as
//! `base64("<name>,<version>")`. The empty token means "first page".

use crate::config::PaginationConfig;
use crate::error::{RegistryError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Decoded resume point of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub name: String,
    pub version: String,
}

impl Cursor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// True for the cursor decoded from an empty token.
    pub fn is_start(&self) -> bool {
        self.name.is_empty() && self.version.is_empty()
    }

    /// Render this cursor as a wire token.
    pub fn encode(&self) -> String {
        encode_cursor(&self.name, &self.version)
    }
}

/// Encode a resume point as an opaque token.
pub fn encode_cursor(name: &str, version: &str) -> String {
    let payload = format!("{}{}{}", name, PaginationConfig::CURSOR_SEPARATOR, version);
    STANDARD.encode(payload.as_bytes())
}

/// Decode a wire token.
///
/// The empty token decodes to the start cursor. Invalid base64 and a payload
/// that does not split into exactly two fields are distinct client errors.
pub fn decode_cursor(token: &str) -> Result<Cursor> {
    if token.is_empty() {
        return Ok(Cursor::default());
    }

    let bytes = STANDARD
        .decode(token)
        .map_err(|e| RegistryError::InvalidCursor {
            message: format!("failed to decode cursor: {}", e),
        })?;

    let payload = String::from_utf8(bytes).map_err(|e| RegistryError::InvalidCursor {
        message: format!("cursor is not valid UTF-8: {}", e),
    })?;

    let parts: Vec<&str> = payload.split(PaginationConfig::CURSOR_SEPARATOR).collect();
    if parts.len() != 2 {
        return Err(RegistryError::InvalidCursorFormat { fields: parts.len() });
    }

    Ok(Cursor::new(parts[0], parts[1]))
}
