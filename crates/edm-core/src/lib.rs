pub mod catalogs;
pub mod derived;
pub mod expr;
pub mod ffi;
pub mod messages;
pub mod options;
pub mod output;
pub mod passes;
pub mod types;

use tracing::debug;

pub use catalogs::COMPILER_VERSION;
pub use derived::Derived;
pub use ffi::compile_to_json;
pub use messages::{CompileError, InternalError, Messages};
pub use options::{ODataFormat, ODataVersion, Options};
pub use output::{build_model, EdmModel};
pub use types::*;

/// Everything one compiler run produced. The annotation translator works on
/// this as a whole.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub graph: SchemaGraph,
    pub options: Options,
    pub derived: Derived,
    pub model: EdmModel,
    pub messages: Messages,
}

impl Compilation {
    /// Final checkpoint: fail if any pass recorded an error.
    pub fn check(&self) -> Result<(), CompileError> {
        self.messages.throw_with_any_error()
    }
}

/// Run all passes over `graph` and build the EDM model.
pub fn compile(mut graph: SchemaGraph, options: &Options) -> Result<Compilation, InternalError> {
    let mut messages = Messages::new();
    let derived = passes::run(&mut graph, options, &mut messages)?;
    let model = build_model(&graph, &derived, options);
    debug!(
        services = model.services.len(),
        diagnostics = messages.diagnostics().len(),
        "compilation finished"
    );
    Ok(Compilation {
        graph,
        options: options.clone(),
        derived,
        model,
        messages,
    })
}
