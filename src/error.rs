//! Error taxonomy for graph construction, apply, and export.
//!
//! Graph-construction errors (duplicate names, cycles, dangling references)
//! reject the graph outright before any provisioning call. Provisioning
//! failures abort the run and leave already-created resources for an
//! idempotent re-apply. `UnresolvedDependency` and `MissingOutput` are
//! internal consistency checks that cannot trigger given a correct
//! topological order.

use crate::core::types::ResourceKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate resource name: '{0}'")]
    DuplicateName(String),

    #[error("dependency cycle detected involving: {0}")]
    CycleDetected(String),

    #[error("resource '{from}' references unregistered resource '{to}' via attribute '{attribute}'")]
    DanglingReference {
        from: String,
        to: String,
        attribute: String,
    },

    #[error("provisioning {kind} '{name}' failed: {message}")]
    Provisioning {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("resource '{resource}' attribute '{attribute}' reads '{dependency}.{output}' before it was resolved")]
    UnresolvedDependency {
        resource: String,
        attribute: String,
        dependency: String,
        output: String,
    },

    #[error("export '{export}' references '{resource}.{output}' which was never resolved")]
    MissingOutput {
        export: String,
        resource: String,
        output: String,
    },

    #[error("duplicate export name: '{0}'")]
    DuplicateExport(String),

    #[error("state file error: {0}")]
    State(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
