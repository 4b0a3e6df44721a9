//! Wire codec for relay solutions.
//!
//! The relay script receives the target host's own solutions smuggled
//! through a single CLI flag as base64(JSON array). The format predates
//! this crate and is compatibility-critical; the codec is the one place
//! that knows it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::ExecutionSolution;
use crate::errors::{OrchestratorError, Result};

/// Encode nested solutions as the `-HSJB` flag value: base64 over a JSON
/// array, never the wrapping object.
pub fn encode_nested(nested: &[ExecutionSolution]) -> Result<String> {
    let json = serde_json::to_string(nested)
        .map_err(|e| OrchestratorError::Configuration(format!("encode nested solutions: {e}")))?;
    Ok(BASE64.encode(json))
}

/// Decode a `-HSJB` flag value back into solutions.
pub fn decode_nested(blob: &str) -> Result<Vec<ExecutionSolution>> {
    let raw = BASE64
        .decode(blob)
        .map_err(|e| OrchestratorError::Configuration(format!("decode nested solutions: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| OrchestratorError::Configuration(format!("decode nested solutions: {e}")))
}
