//! Temaki Core
//!
//! Core compiler for FHIR Shorthand (FSH) sources. This crate provides the
//! fundamental components for importing shorthand documents, compiling
//! Profiles and Extensions into StructureDefinitions, materializing
//! Instances, and assembling the resulting artifact package.

pub mod ast;
pub mod canonical;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod import;
pub mod semantic;

// Re-export commonly used types
pub use ast::{
    BindingStrength, CardMax, Document, Entity, FshCode, FshQuantity, FshRatio, FshValue,
    InstanceUsage, Rule,
};
pub use canonical::DefinitionsCache;
pub use config::ProjectConfiguration;
pub use diagnostics::{Diagnostic, Reporter, Severity, SourceSpan};
pub use error::{ErrorKind, TemakiError};
pub use export::fhir_types::{ElementDefinition, StructureDefinition};
pub use export::{Compiler, ExportError, Package};
pub use import::{FshImporter, RawSource};
pub use semantic::fishing::{FishKind, Fishable, FishingContext};
pub use semantic::Tank;

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("temaki=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
