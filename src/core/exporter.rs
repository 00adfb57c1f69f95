//! Export registration and collection.
//!
//! Exports name a single resolved output attribute. Registrations are taken
//! at declaration time; collection runs strictly after apply, against the
//! write-once output store.

use super::types::{ExportSet, OutputStore};
use crate::error::{Error, Result};

/// One export registration: export name → (resource, output attribute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRegistration {
    pub export: String,
    pub resource: String,
    pub output: String,
}

/// Registers named exports and resolves them against resolved outputs.
#[derive(Debug, Clone, Default)]
pub struct OutputExporter {
    registrations: Vec<ExportRegistration>,
}

impl OutputExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one export. Export names are unique.
    pub fn export(&mut self, export: &str, resource: &str, output: &str) -> Result<()> {
        if self.registrations.iter().any(|r| r.export == export) {
            return Err(Error::DuplicateExport(export.to_string()));
        }
        self.registrations.push(ExportRegistration {
            export: export.to_string(),
            resource: resource.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    pub fn registrations(&self) -> &[ExportRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Resolve every registration against the output store.
    ///
    /// A missing descriptor or attribute means the run did not actually
    /// complete; the check is defensive, unreachable after a successful
    /// apply.
    pub fn collect(&self, outputs: &OutputStore) -> Result<ExportSet> {
        let mut exports = ExportSet::new();
        for registration in &self.registrations {
            let Some(value) = outputs.value(&registration.resource, &registration.output) else {
                return Err(Error::MissingOutput {
                    export: registration.export.clone(),
                    resource: registration.resource.clone(),
                    output: registration.output.clone(),
                });
            };
            exports.insert(registration.export.clone(), value.clone());
        }
        Ok(exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttrMap;
    use serde_json::json;

    fn store_with(resource: &str, output: &str, value: serde_json::Value) -> OutputStore {
        let mut store = OutputStore::new();
        let mut outputs = AttrMap::new();
        outputs.insert(output.to_string(), value);
        store.insert(resource, outputs);
        store
    }

    #[test]
    fn test_collect_resolves_registration() {
        let mut exporter = OutputExporter::new();
        exporter.export("cluster-name", "eks-cluster", "name").unwrap();
        let store = store_with("eks-cluster", "name", json!("eks-cluster"));
        let exports = exporter.collect(&store).unwrap();
        assert_eq!(exports["cluster-name"], json!("eks-cluster"));
    }

    #[test]
    fn test_duplicate_export_name_rejected() {
        let mut exporter = OutputExporter::new();
        exporter.export("cluster-name", "eks-cluster", "name").unwrap();
        let err = exporter
            .export("cluster-name", "eks-cluster", "endpoint")
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateExport(_)));
    }

    #[test]
    fn test_missing_descriptor_fails_collect() {
        let mut exporter = OutputExporter::new();
        exporter.export("pod-role-name", "pod-execution-role", "name").unwrap();
        let err = exporter.collect(&OutputStore::new()).unwrap_err();
        match err {
            Error::MissingOutput { export, resource, .. } => {
                assert_eq!(export, "pod-role-name");
                assert_eq!(resource, "pod-execution-role");
            }
            other => panic!("expected MissingOutput, got {other}"),
        }
    }

    #[test]
    fn test_missing_attribute_fails_collect() {
        let mut exporter = OutputExporter::new();
        exporter.export("cluster-endpoint", "eks-cluster", "endpoint").unwrap();
        let store = store_with("eks-cluster", "name", json!("eks-cluster"));
        let err = exporter.collect(&store).unwrap_err();
        assert!(matches!(err, Error::MissingOutput { .. }));
    }

    #[test]
    fn test_collect_preserves_registration_order() {
        let mut exporter = OutputExporter::new();
        exporter.export("second", "r", "b").unwrap();
        exporter.export("first", "r", "a").unwrap();

        let mut outputs = AttrMap::new();
        outputs.insert("a".to_string(), json!(1));
        outputs.insert("b".to_string(), json!(2));
        let mut store = OutputStore::new();
        store.insert("r", outputs);

        let exports = exporter.collect(&store).unwrap();
        let keys: Vec<_> = exports.keys().collect();
        assert_eq!(keys, vec!["second", "first"]);
    }
}
