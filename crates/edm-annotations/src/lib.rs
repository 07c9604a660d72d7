//! EDM annotation translator: vocabulary annotations of a compiled schema
//! graph as targeted, typed annotation nodes.
//!
//! Works on a [`edm_core::Compilation`] and a [`Vocabulary`] dictionary;
//! problems are reported as diagnostics in [`AnnotationResult::messages`].

pub mod dynamic;
pub mod ffi;
pub mod functions;
pub mod group;
pub mod output;
pub mod placement;
pub mod shortcuts;
pub mod translate;
pub mod values;
pub mod vocabulary;

pub use dynamic::{DynError, DynExpr, DynOp};
pub use ffi::translate_to_json;
pub use output::{AnnotationNode, AnnotationResult, EdmValue, PathKind, Record, ServiceAnnotations};
pub use placement::{Carrier, CarrierKind};
pub use shortcuts::{Shortcut, Shortcuts};
pub use translate::translate_annotations;
pub use vocabulary::{Vocabulary, VocabularyError};
