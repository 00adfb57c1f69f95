//! Provisioning collaborator boundary.
//!
//! The engine's only external interface: one idempotent create-or-update
//! call per resource. Credential and region resolution belong to the
//! collaborator, not to the engine; durable state (which resources exist,
//! their last-applied attributes) is the collaborator's too.

pub mod sim;

use crate::core::types::{AttrMap, ResourceKind};
use async_trait::async_trait;
use thiserror::Error;

/// Failure returned by the collaborator for a single resource.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProvisionError {
    pub message: String,
}

impl ProvisionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Successful result of one create-or-update call.
#[derive(Debug, Clone)]
pub struct Provisioned {
    /// Resolved output attributes (identifiers, ARNs, endpoints).
    pub outputs: AttrMap,
    /// True when the resource already matched desired state.
    pub unchanged: bool,
}

/// Cloud provisioning collaborator.
///
/// Implementations must be idempotent: retrying with the same declared
/// attributes converges without side effects.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_or_update(
        &self,
        kind: ResourceKind,
        name: &str,
        attributes: &AttrMap,
    ) -> Result<Provisioned, ProvisionError>;
}
