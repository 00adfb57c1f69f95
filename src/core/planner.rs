//! Plan generation — a dry view of what apply would do, in what order.
//!
//! The plan is pure: it never touches the provisioning collaborator. Steps
//! come out in execution order, annotated with the wave (graph depth) at
//! which each node becomes eligible, so independent resources that may run
//! concurrently are visible at a glance.

use super::graph::Graph;
use super::types::{ResourceDescriptor, ResourceKind};

/// One planned step.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub resource: String,
    pub kind: ResourceKind,
    /// Graph depth; steps sharing a wave have no mutual ordering constraint.
    pub wave: usize,
    pub description: String,
}

/// Full execution plan for a graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Steps in apply order.
    pub steps: Vec<PlannedStep>,
    /// Names grouped by wave.
    pub waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build the execution plan for a graph.
pub fn plan(graph: &Graph) -> ExecutionPlan {
    let waves = graph.waves();
    let mut wave_of = std::collections::HashMap::new();
    for (depth, members) in waves.iter().enumerate() {
        for name in members {
            wave_of.insert(name.clone(), depth);
        }
    }

    let steps = graph
        .execution_order()
        .into_iter()
        .map(|name| {
            let descriptor = graph.get(&name).expect("ordered name is registered");
            PlannedStep {
                resource: name.clone(),
                kind: descriptor.kind(),
                wave: wave_of.get(&name).copied().unwrap_or(0),
                description: describe(descriptor),
            }
        })
        .collect();

    ExecutionPlan { steps, waves }
}

/// Human-readable one-liner for a descriptor, keyed on what matters for the
/// kind.
fn describe(descriptor: &ResourceDescriptor) -> String {
    let name = descriptor.name();
    let str_attr = |key: &str| {
        descriptor
            .literal(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    match descriptor.kind() {
        ResourceKind::Network => {
            let cidr = str_attr("cidr_block").unwrap_or_else(|| "?".to_string());
            format!("{name}: create network ({cidr})")
        }
        ResourceKind::Subnet => {
            let cidr = str_attr("cidr_block").unwrap_or_else(|| "?".to_string());
            let az = str_attr("availability_zone").unwrap_or_else(|| "?".to_string());
            format!("{name}: create subnet ({cidr} in {az})")
        }
        ResourceKind::Cluster => {
            let version = str_attr("version").unwrap_or_else(|| "?".to_string());
            format!("{name}: create cluster (version {version})")
        }
        ResourceKind::NodeGroup => {
            let instance = str_attr("instance_type").unwrap_or_else(|| "?".to_string());
            format!("{name}: create node group ({instance})")
        }
        ResourceKind::PolicyAttachment => {
            let policy = str_attr("policy_arn")
                .and_then(|arn| arn.rsplit('/').next().map(str::to_string))
                .unwrap_or_else(|| "?".to_string());
            format!("{name}: attach {policy}")
        }
        kind => format!("{name}: create {kind}"),
    }
}
