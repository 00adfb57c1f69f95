//! Data model for the resource dependency graph.
//!
//! Descriptors are immutable declarations of one cloud object's desired
//! attributes. Attributes are tagged at construction as either literals or
//! references to another descriptor's output, so the dependency set falls
//! out of the declaration itself. Resolved outputs exist only after a
//! successful apply call and are write-once per descriptor.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Attribute map with declaration order preserved.
pub type AttrMap = IndexMap<String, serde_json::Value>;

// ============================================================================
// Resource kinds
// ============================================================================

/// Cloud resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Gateway,
    Subnet,
    RouteTable,
    RouteAssociation,
    Role,
    PolicyAttachment,
    Cluster,
    NodeGroup,
    OidcProvider,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Gateway => write!(f, "gateway"),
            Self::Subnet => write!(f, "subnet"),
            Self::RouteTable => write!(f, "route_table"),
            Self::RouteAssociation => write!(f, "route_association"),
            Self::Role => write!(f, "role"),
            Self::PolicyAttachment => write!(f, "policy_attachment"),
            Self::Cluster => write!(f, "cluster"),
            Self::NodeGroup => write!(f, "node_group"),
            Self::OidcProvider => write!(f, "oidc_provider"),
        }
    }
}

// ============================================================================
// Attribute values
// ============================================================================

/// An attribute value — a literal, or a reference to another descriptor's
/// output that stays unresolved until that descriptor has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Literal(serde_json::Value),
    Ref { resource: String, output: String },
}

impl AttrValue {
    /// The literal value, if this attribute is one.
    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Ref { .. } => None,
        }
    }

    /// The (resource, output) pair, if this attribute is a reference.
    pub fn as_ref_target(&self) -> Option<(&str, &str)> {
        match self {
            Self::Literal(_) => None,
            Self::Ref { resource, output } => Some((resource, output)),
        }
    }
}

// ============================================================================
// Resource descriptors
// ============================================================================

/// Immutable declaration of one cloud object's desired state.
///
/// Created once at declaration time, never mutated after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    kind: ResourceKind,
    name: String,
    attributes: IndexMap<String, AttrValue>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Add a literal attribute.
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes
            .insert(key.to_string(), AttrValue::Literal(value.into()));
        self
    }

    /// Add an attribute that references another descriptor's output.
    #[must_use]
    pub fn attr_ref(mut self, key: &str, resource: &str, output: &str) -> Self {
        self.attributes.insert(
            key.to_string(),
            AttrValue::Ref {
                resource: resource.to_string(),
                output: output.to_string(),
            },
        );
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &IndexMap<String, AttrValue> {
        &self.attributes
    }

    /// The literal value of an attribute, if present and literal.
    pub fn literal(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key).and_then(AttrValue::as_literal)
    }

    /// Iterate the reference-tagged attributes as (attribute, resource, output).
    pub fn references(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.attributes.iter().filter_map(|(attr, value)| {
            value
                .as_ref_target()
                .map(|(resource, output)| (attr.as_str(), resource, output))
        })
    }

    pub(crate) fn insert_reference(&mut self, attribute: &str, resource: &str, output: &str) {
        self.attributes.insert(
            attribute.to_string(),
            AttrValue::Ref {
                resource: resource.to_string(),
                output: output.to_string(),
            },
        );
    }
}

// ============================================================================
// Resolved outputs
// ============================================================================

/// Append-only store of resolved outputs, write-once per descriptor.
///
/// Owned by the applier's scheduling loop; dependents only ever read values
/// their dependencies have already published.
#[derive(Debug, Clone, Default)]
pub struct OutputStore {
    resolved: IndexMap<String, AttrMap>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a descriptor's outputs. Each descriptor resolves exactly once.
    pub fn insert(&mut self, resource: &str, outputs: AttrMap) {
        debug_assert!(
            !self.resolved.contains_key(resource),
            "outputs for '{resource}' resolved twice"
        );
        self.resolved.insert(resource.to_string(), outputs);
    }

    pub fn get(&self, resource: &str) -> Option<&AttrMap> {
        self.resolved.get(resource)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resolved.contains_key(resource)
    }

    /// Look up a single output value.
    pub fn value(&self, resource: &str, output: &str) -> Option<&serde_json::Value> {
        self.resolved.get(resource).and_then(|m| m.get(output))
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrMap)> {
        self.resolved.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Final export mapping, assembled from the `OutputStore` after apply.
pub type ExportSet = IndexMap<String, serde_json::Value>;

// ============================================================================
// Apply reporting
// ============================================================================

/// Per-node result of an apply run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Created or updated by the collaborator.
    Provisioned,
    /// Collaborator reported the resource already matched desired state.
    Unchanged,
    /// Collaborator returned a failure.
    Failed(String),
    /// Fail-fast abort before this node's call was issued.
    NeverStarted,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioned => write!(f, "PROVISIONED"),
            Self::Unchanged => write!(f, "UNCHANGED"),
            Self::Failed(_) => write!(f, "FAILED"),
            Self::NeverStarted => write!(f, "NEVER-STARTED"),
        }
    }
}

/// The first provisioning failure of a run.
#[derive(Debug, Clone)]
pub struct ProvisioningFailure {
    pub kind: ResourceKind,
    pub name: String,
    pub message: String,
}

impl From<ProvisioningFailure> for crate::error::Error {
    fn from(f: ProvisioningFailure) -> Self {
        Self::Provisioning {
            kind: f.kind,
            name: f.name,
            message: f.message,
        }
    }
}

/// Summary of one apply run: which nodes completed, which failed, which
/// never started.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Outcome per node, in declaration order.
    pub outcomes: IndexMap<String, NodeOutcome>,
    pub provisioned: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub never_started: u32,
    /// First failure, if any. Later eligible nodes are aborted fail-fast.
    pub failure: Option<ProvisioningFailure>,
    pub total_duration: Duration,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything an apply run produces: the resolved outputs and the report.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub outputs: OutputStore,
    pub report: ApplyReport,
}
