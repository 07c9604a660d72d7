//! JSON entry point compiling a model and translating its annotations in
//! one call.

use std::panic::{catch_unwind, AssertUnwindSafe};

use edm_core::catalogs::COMPILER_VERSION;
use edm_core::ffi::{parse_inputs, to_envelope, FfiResult};
use edm_core::{compile, Diagnostic, EdmModel};
use serde::Serialize;

use crate::output::AnnotationResult;
use crate::translate::translate_annotations;
use crate::vocabulary::{Vocabulary, VocabularyError};

#[derive(Debug, Serialize)]
pub struct TranslateOutput {
    pub version: &'static str,
    pub model: EdmModel,
    pub annotations: AnnotationResult,
    pub diagnostics: Vec<Diagnostic>,
}

/// Standard vocabularies, extended by the caller's dictionary if one is given.
fn load_vocabulary(vocabulary_json: &str) -> Result<Vocabulary, String> {
    let mut vocabulary = Vocabulary::standard().map_err(|e| format!("Standard vocabularies: {e}"))?;
    if !vocabulary_json.trim().is_empty() {
        let extra = Vocabulary::from_json(vocabulary_json)
            .map_err(|VocabularyError::Json(e)| format!("Invalid vocabulary JSON: {e}"))?;
        vocabulary.merge(extra);
    }
    Ok(vocabulary)
}

/// Compile a schema graph and translate its annotations.
///
/// Input: schema graph JSON + vocabulary JSON (may be empty) + options JSON
/// Output: JSON envelope with model, annotations and the diagnostics of both
/// stages; `success` is false when errors were recorded.
pub fn translate_to_json(csn_json: &str, vocabulary_json: &str, options_json: &str) -> String {
    let (graph, options) = match parse_inputs(csn_json, options_json) {
        Ok(inputs) => inputs,
        Err(e) => return to_envelope(&FfiResult::failure(e)),
    };
    let vocabulary = match load_vocabulary(vocabulary_json) {
        Ok(vocabulary) => vocabulary,
        Err(e) => return to_envelope(&FfiResult::failure(e)),
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        compile(graph, &options).map(|compilation| {
            let annotations = translate_annotations(&compilation, &vocabulary);
            (compilation, annotations)
        })
    }));
    match result {
        Ok(Ok((compilation, annotations))) => {
            let mut messages = compilation.messages;
            messages.extend(annotations.messages.clone());
            let error = messages.throw_with_any_error().err().map(|e| e.to_string());
            let output = TranslateOutput {
                version: COMPILER_VERSION,
                model: compilation.model,
                annotations,
                diagnostics: messages.into_diagnostics(),
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
