//! Apply loop — cooperative task-graph execution over the dependency graph.
//!
//! Nodes become eligible as soon as every dependency has published its
//! resolved outputs, and eligible nodes run in parallel worker tasks bounded
//! by an optional concurrency limit (unbounded by default). The scheduling
//! loop is the single writer of the `OutputStore`, so publication needs no
//! lock. On the first failure no new node starts; in-flight provisioning
//! calls are drained rather than interrupted, and the report records which
//! nodes completed, which failed, and which never started.

use super::graph::Graph;
use super::types::{
    ApplyOutcome, ApplyReport, AttrMap, AttrValue, ExportSet, NodeOutcome, OutputStore,
    ProvisioningFailure, ResourceDescriptor,
};
use crate::core::exporter::OutputExporter;
use crate::error::{Error, Result};
use crate::provenance::eventlog::{generate_run_id, ApplyEvent, EventLog};
use crate::provenance::hasher;
use crate::provider::{ProvisionError, Provisioned, Provisioner};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Options for one apply run.
#[derive(Debug, Default)]
pub struct ApplyOptions {
    /// Maximum concurrent provisioning calls. `None` means unbounded,
    /// matching the collaborator's own parallel-apply behavior.
    pub limit: Option<usize>,

    /// Optional provenance event log, appended to as nodes start and finish.
    pub events: Option<EventLog>,
}

impl ApplyOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

fn log_event(events: Option<&EventLog>, event: ApplyEvent) {
    if let Some(log) = events {
        let _ = log.append(event);
    }
}

/// Substitute every reference attribute with its dependency's resolved
/// output value. Failure here indicates a scheduling defect: a correct
/// topological order never starts a node before its dependencies resolve.
fn resolve_attributes(descriptor: &ResourceDescriptor, store: &OutputStore) -> Result<AttrMap> {
    let mut resolved = AttrMap::new();
    for (attribute, value) in descriptor.attributes() {
        match value {
            AttrValue::Literal(v) => {
                resolved.insert(attribute.clone(), v.clone());
            }
            AttrValue::Ref { resource, output } => {
                let Some(v) = store.value(resource, output) else {
                    return Err(Error::UnresolvedDependency {
                        resource: descriptor.name().to_string(),
                        attribute: attribute.clone(),
                        dependency: resource.clone(),
                        output: output.clone(),
                    });
                };
                resolved.insert(attribute.clone(), v.clone());
            }
        }
    }
    Ok(resolved)
}

/// Apply every node of `graph` through `provisioner`, dependencies first.
///
/// Returns `Err` only for internal defects; provisioning failures are
/// reported through [`ApplyReport::failure`] so callers still see which
/// nodes completed and which never started.
pub async fn apply(
    graph: &Graph,
    provisioner: Arc<dyn Provisioner>,
    options: &ApplyOptions,
) -> Result<ApplyOutcome> {
    let start = Instant::now();
    let run_id = generate_run_id();
    let events = options.events.as_ref();

    log_event(
        events,
        ApplyEvent::ApplyStarted {
            run_id: run_id.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: u32::try_from(graph.len()).unwrap_or(u32::MAX),
        },
    );

    let mut remaining: Vec<usize> = (0..graph.len())
        .map(|i| graph.dependencies_of(i).len())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut outputs = OutputStore::new();
    let mut report = ApplyReport::default();
    let mut tasks: JoinSet<(usize, std::result::Result<Provisioned, ProvisionError>, f64)> =
        JoinSet::new();
    let mut in_flight = 0usize;
    let mut defect: Option<Error> = None;

    loop {
        // Launch eligible nodes, declaration order first, while capacity
        // allows and no failure has been observed.
        while defect.is_none()
            && report.failure.is_none()
            && options.limit.is_none_or(|l| in_flight < l)
        {
            let Some(Reverse(idx)) = ready.pop() else {
                break;
            };
            let descriptor = graph.node(idx);
            let attributes = match resolve_attributes(descriptor, &outputs) {
                Ok(a) => a,
                Err(e) => {
                    defect = Some(e);
                    break;
                }
            };
            log_event(
                events,
                ApplyEvent::ResourceStarted {
                    resource: descriptor.name().to_string(),
                    kind: descriptor.kind(),
                },
            );
            let provisioner = Arc::clone(&provisioner);
            let kind = descriptor.kind();
            let name = descriptor.name().to_string();
            tasks.spawn(async move {
                let call_start = Instant::now();
                let result = provisioner.create_or_update(kind, &name, &attributes).await;
                (idx, result, call_start.elapsed().as_secs_f64())
            });
            in_flight += 1;
        }

        if in_flight == 0 {
            break;
        }

        let joined = match tasks.join_next().await {
            Some(j) => j,
            None => break,
        };
        in_flight -= 1;
        let (idx, result, duration) = match joined {
            Ok(v) => v,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(Error::Internal(format!("apply task aborted: {e}"))),
        };

        let descriptor = graph.node(idx);
        match result {
            Ok(provisioned) => {
                log_event(
                    events,
                    if provisioned.unchanged {
                        ApplyEvent::ResourceUnchanged {
                            resource: descriptor.name().to_string(),
                        }
                    } else {
                        ApplyEvent::ResourceProvisioned {
                            resource: descriptor.name().to_string(),
                            duration_seconds: duration,
                            outputs_hash: hasher::hash_attrs(&provisioned.outputs),
                        }
                    },
                );
                if provisioned.unchanged {
                    report.unchanged += 1;
                    report
                        .outcomes
                        .insert(descriptor.name().to_string(), NodeOutcome::Unchanged);
                } else {
                    report.provisioned += 1;
                    report
                        .outcomes
                        .insert(descriptor.name().to_string(), NodeOutcome::Provisioned);
                }
                outputs.insert(descriptor.name(), provisioned.outputs);
                for &dependent in graph.dependents_of(idx) {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                log_event(
                    events,
                    ApplyEvent::ResourceFailed {
                        resource: descriptor.name().to_string(),
                        error: message.clone(),
                    },
                );
                report.failed += 1;
                report.outcomes.insert(
                    descriptor.name().to_string(),
                    NodeOutcome::Failed(message.clone()),
                );
                if report.failure.is_none() {
                    report.failure = Some(ProvisioningFailure {
                        kind: descriptor.kind(),
                        name: descriptor.name().to_string(),
                        message,
                    });
                }
            }
        }
    }

    // Whatever was neither applied nor failed was aborted before starting.
    for descriptor in graph.descriptors() {
        if !report.outcomes.contains_key(descriptor.name()) {
            report.never_started += 1;
            report
                .outcomes
                .insert(descriptor.name().to_string(), NodeOutcome::NeverStarted);
        }
    }
    report.total_duration = start.elapsed();

    log_event(
        events,
        ApplyEvent::ApplyCompleted {
            run_id,
            provisioned: report.provisioned,
            unchanged: report.unchanged,
            failed: report.failed,
            never_started: report.never_started,
            total_seconds: report.total_duration.as_secs_f64(),
        },
    );

    if let Some(e) = defect {
        return Err(e);
    }
    Ok(ApplyOutcome { outputs, report })
}

/// Apply the graph and collect the registered exports in one step, turning
/// any provisioning failure into an error.
pub async fn apply_and_export(
    graph: &Graph,
    exporter: &OutputExporter,
    provisioner: Arc<dyn Provisioner>,
    options: &ApplyOptions,
) -> Result<ExportSet> {
    let outcome = apply(graph, provisioner, options).await?;
    if let Some(failure) = outcome.report.failure {
        return Err(failure.into());
    }
    exporter.collect(&outcome.outputs)
}
