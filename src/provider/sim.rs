//! Simulated cloud collaborator.
//!
//! Synthesizes deterministic identifiers, ARNs, and endpoints per resource
//! kind, detects no-ops by BLAKE3 hash of the desired attributes, and can
//! persist its resource table to a state directory so re-applies across
//! process runs stay idempotent. The persisted table is the collaborator's
//! own state; the engine holds none.

use super::{ProvisionError, Provisioned, Provisioner};
use crate::core::types::{AttrMap, OutputStore, ResourceKind};
use crate::error::{Error, Result};
use crate::provenance::hasher;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const REGION: &str = "us-east-1";
const ACCOUNT_ID: &str = "123456789012";
const STATE_FILE: &str = "cloud.state.yaml";

/// One applied resource in the simulated cloud's table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppliedResource {
    kind: ResourceKind,
    desired_hash: String,
    outputs: AttrMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudTable {
    resources: IndexMap<String, AppliedResource>,
}

/// In-memory cloud with idempotent create-or-update semantics.
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    table: Mutex<CloudTable>,
    state_path: Option<PathBuf>,
    fail: Mutex<HashSet<String>>,
    seen: Mutex<IndexMap<String, AttrMap>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a simulated cloud backed by `state_dir`, loading any previously
    /// persisted resource table.
    pub fn with_state_dir(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(STATE_FILE);
        let table = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml_ng::from_str(&content)
                .map_err(|e| Error::State(format!("invalid state file {}: {e}", path.display())))?
        } else {
            CloudTable::default()
        };
        Ok(Self {
            table: Mutex::new(table),
            state_path: Some(path),
            ..Self::default()
        })
    }

    /// Path of the persisted resource table under a state directory.
    pub fn state_file(state_dir: &Path) -> PathBuf {
        state_dir.join(STATE_FILE)
    }

    /// Persist the resource table (atomic: temp file + rename). No-op when
    /// no state directory was given.
    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let table = self.table.lock().expect("cloud table lock");
        let yaml = serde_yaml_ng::to_string(&*table)
            .map_err(|e| Error::State(format!("serialize error: {e}")))?;
        drop(table);

        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Inject a failure for one resource name.
    pub fn fail_on(&self, name: &str) {
        self.fail
            .lock()
            .expect("fail set lock")
            .insert(name.to_string());
    }

    /// Names in the order their calls were issued.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().expect("call log lock").clone()
    }

    /// The resolved attributes a resource's call received.
    pub fn seen_attributes(&self, name: &str) -> Option<AttrMap> {
        self.seen.lock().expect("seen lock").get(name).cloned()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of resources in the table.
    pub fn len(&self) -> usize {
        self.table.lock().expect("cloud table lock").resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild an output store from the resource table, for collecting
    /// exports without re-applying.
    pub fn resolved_outputs(&self) -> OutputStore {
        let table = self.table.lock().expect("cloud table lock");
        let mut store = OutputStore::new();
        for (name, applied) in &table.resources {
            store.insert(name, applied.outputs.clone());
        }
        store
    }

    fn converge(
        &self,
        kind: ResourceKind,
        name: &str,
        attributes: &AttrMap,
    ) -> std::result::Result<Provisioned, ProvisionError> {
        if self.fail.lock().expect("fail set lock").contains(name) {
            return Err(ProvisionError::new(format!(
                "simulated failure injected for '{name}'"
            )));
        }

        let desired_hash = hasher::hash_attrs(attributes);
        let mut table = self.table.lock().expect("cloud table lock");
        if let Some(existing) = table.resources.get(name) {
            if existing.desired_hash == desired_hash {
                return Ok(Provisioned {
                    outputs: existing.outputs.clone(),
                    unchanged: true,
                });
            }
        }

        let outputs = synthesize_outputs(kind, name, attributes);
        table.resources.insert(
            name.to_string(),
            AppliedResource {
                kind,
                desired_hash,
                outputs: outputs.clone(),
            },
        );
        Ok(Provisioned {
            outputs,
            unchanged: false,
        })
    }
}

#[async_trait]
impl Provisioner for SimulatedCloud {
    async fn create_or_update(
        &self,
        kind: ResourceKind,
        name: &str,
        attributes: &AttrMap,
    ) -> std::result::Result<Provisioned, ProvisionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().expect("call log lock").push(name.to_string());
        self.seen
            .lock()
            .expect("seen lock")
            .insert(name.to_string(), attributes.clone());

        // Let concurrently eligible calls overlap.
        tokio::task::yield_now().await;

        let result = self.converge(kind, name, attributes);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Stable short hex identifier derived from a resource name.
fn short_id(name: &str) -> String {
    blake3::hash(name.as_bytes()).to_hex()[..17].to_string()
}

fn role_trust_policy(attributes: &AttrMap) -> serde_json::Value {
    // Federated web-identity trust when OIDC references are present,
    // otherwise the declared service trust document.
    match (
        attributes.get("federated_arn").and_then(|v| v.as_str()),
        attributes.get("issuer_url").and_then(|v| v.as_str()),
    ) {
        (Some(arn), Some(url)) => {
            let issuer = url.strip_prefix("https://").unwrap_or(url);
            let subject = attributes
                .get("service_account")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Federated": arn },
                    "Action": "sts:AssumeRoleWithWebIdentity",
                    "Condition": {
                        "StringEquals": { (format!("{issuer}:sub")): subject }
                    }
                }]
            })
        }
        _ => attributes
            .get("assume_role_policy")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Deterministic outputs per resource kind, mirroring what the real cloud
/// returns for each.
fn synthesize_outputs(kind: ResourceKind, name: &str, attributes: &AttrMap) -> AttrMap {
    let id = short_id(name);
    let mut outputs = AttrMap::new();
    match kind {
        ResourceKind::Network => {
            outputs.insert("id".to_string(), json!(format!("vpc-{id}")));
        }
        ResourceKind::Gateway => {
            outputs.insert("id".to_string(), json!(format!("igw-{id}")));
        }
        ResourceKind::Subnet => {
            outputs.insert("id".to_string(), json!(format!("subnet-{id}")));
        }
        ResourceKind::RouteTable => {
            outputs.insert("id".to_string(), json!(format!("rtb-{id}")));
        }
        ResourceKind::RouteAssociation => {
            outputs.insert("id".to_string(), json!(format!("rtbassoc-{id}")));
        }
        ResourceKind::Role => {
            outputs.insert("name".to_string(), json!(name));
            outputs.insert(
                "arn".to_string(),
                json!(format!("arn:aws:iam::{ACCOUNT_ID}:role/{name}")),
            );
            outputs.insert("assume_role_policy".to_string(), role_trust_policy(attributes));
        }
        ResourceKind::PolicyAttachment => {
            outputs.insert("id".to_string(), json!(format!("attach-{id}")));
        }
        ResourceKind::Cluster => {
            let issuer_id = short_id(&format!("{name}/oidc")).to_uppercase();
            outputs.insert("name".to_string(), json!(name));
            outputs.insert(
                "arn".to_string(),
                json!(format!("arn:aws:eks:{REGION}:{ACCOUNT_ID}:cluster/{name}")),
            );
            outputs.insert(
                "endpoint".to_string(),
                json!(format!("https://{}.gr7.{REGION}.eks.amazonaws.com", id.to_uppercase())),
            );
            outputs.insert(
                "certificate_authority".to_string(),
                json!(hasher::hash_string(&format!("{name}/ca"))),
            );
            outputs.insert(
                "oidc_issuer".to_string(),
                json!(format!("https://oidc.eks.{REGION}.amazonaws.com/id/{issuer_id}")),
            );
        }
        ResourceKind::NodeGroup => {
            outputs.insert("name".to_string(), json!(name));
            outputs.insert(
                "arn".to_string(),
                json!(format!("arn:aws:eks:{REGION}:{ACCOUNT_ID}:nodegroup/{name}/{id}")),
            );
            outputs.insert("status".to_string(), json!("ACTIVE"));
        }
        ResourceKind::OidcProvider => {
            let url = attributes
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let host_path = url.strip_prefix("https://").unwrap_or(&url);
            outputs.insert("url".to_string(), json!(url));
            outputs.insert(
                "arn".to_string(),
                json!(format!("arn:aws:iam::{ACCOUNT_ID}:oidc-provider/{host_path}")),
            );
        }
    }
    outputs
}
