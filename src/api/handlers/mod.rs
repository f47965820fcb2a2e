//! REST API handlers organized by resource.

pub mod audit;
pub mod documents;
pub mod health;
pub mod proofs;

pub use audit::*;
pub use documents::*;
pub use health::*;
pub use proofs::*;

use base64::Engine;

use crate::api::error::{validation_error, ApiError};
use crate::domain::DocumentFormat;

/// Decode the base64 `content` field of a request.
pub(crate) fn decode_content(content: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .map_err(|e| validation_error("content", format!("content is not valid base64: {e}")))
}

pub(crate) fn parse_format(tag: &str) -> Result<DocumentFormat, ApiError> {
    DocumentFormat::from_tag(tag).map_err(ApiError::from)
}
