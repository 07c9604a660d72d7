//! FFI-oriented JSON API for cross-language bindings.
//!
//! All functions take string inputs and return JSON strings,
//! minimizing the FFI surface area.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::catalogs::COMPILER_VERSION;
use crate::compile;
use crate::options::Options;
use crate::output::EdmModel;
use crate::types::{Diagnostic, SchemaGraph};

// ---------------------------------------------------------------------------
// Result types (serialized to JSON output)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct FfiResult<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> FfiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl FfiResult<()> {
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompileOutput {
    pub version: &'static str,
    pub model: EdmModel,
    pub diagnostics: Vec<Diagnostic>,
}

/// Serialize an envelope; a serialization failure becomes a failure envelope.
pub fn to_envelope<T: Serialize>(result: &FfiResult<T>) -> String {
    serde_json::to_string(result).unwrap_or_else(|e| {
        let failure = FfiResult::failure(format!("JSON serialization error: {e}"));
        serde_json::to_string(&failure)
            .unwrap_or_else(|_| r#"{"success":false,"error":"JSON serialization error"}"#.to_string())
    })
}

/// Parse the schema graph and options JSON shared by every entry point.
pub fn parse_inputs(csn_json: &str, options_json: &str) -> Result<(SchemaGraph, Options), String> {
    let graph: SchemaGraph =
        serde_json::from_str(csn_json).map_err(|e| format!("Invalid model JSON: {e}"))?;
    let options: Options = if options_json.trim().is_empty() {
        Options::default()
    } else {
        serde_json::from_str(options_json).map_err(|e| format!("Invalid options JSON: {e}"))?
    };
    Ok((graph, options))
}

// ---------------------------------------------------------------------------
// Public FFI functions
// ---------------------------------------------------------------------------

/// Compile a schema graph and return the EDM model as JSON.
///
/// Input: schema graph JSON + options JSON
/// Output: JSON envelope with the model and all diagnostics; `success` is
/// false when errors were recorded.
pub fn compile_to_json(csn_json: &str, options_json: &str) -> String {
    let (graph, options) = match parse_inputs(csn_json, options_json) {
        Ok(inputs) => inputs,
        Err(e) => return to_envelope(&FfiResult::failure(e)),
    };

    let result = catch_unwind(AssertUnwindSafe(|| compile(graph, &options)));
    match result {
        Ok(Ok(compilation)) => {
            let error = compilation.check().err().map(|e| e.to_string());
            let output = CompileOutput {
                version: COMPILER_VERSION,
                model: compilation.model,
                diagnostics: compilation.messages.into_diagnostics(),
            };
            to_envelope(&FfiResult {
                success: error.is_none(),
                data: Some(output),
                error,
            })
        }
        Ok(Err(internal)) => to_envelope(&FfiResult::failure(format!("Internal error: {internal}"))),
        Err(_) => to_envelope(&FfiResult::failure("Internal compiler panic".to_string())),
    }
}
