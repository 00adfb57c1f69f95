//! The managed-cluster topology: VPC, internet gateway, two public subnets,
//! routing, control plane, worker node group, and IAM/OIDC trust wiring.
//!
//! Every resource here is a one-to-one declaration of a cloud object. The
//! ordering between them is carried entirely by attribute references; the
//! graph builder turns those into edges and the applier does the rest.

use crate::core::exporter::OutputExporter;
use crate::core::graph::{Graph, GraphBuilder};
use crate::core::types::{ResourceDescriptor, ResourceKind};
use crate::error::Result;
use serde_json::json;

/// Display name for the built-in topology.
pub const TOPOLOGY_NAME: &str = "eks-cluster-topology";

const CLUSTER_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy";
const WORKER_NODE_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy";
const CNI_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy";
const ECR_READONLY_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly";

const OIDC_CLIENT_ID: &str = "sts.amazonaws.com";
const OIDC_THUMBPRINT: &str = "9e99a48a9960b14926bb7f3b02e22da2b0ab7280";

/// Tunable parameters for the topology. Defaults match the canonical
/// deployment.
#[derive(Debug, Clone)]
pub struct TopologyParams {
    pub vpc_cidr: String,
    pub subnet_cidrs: [String; 2],
    pub availability_zones: [String; 2],
    pub cluster_version: String,
    pub instance_type: String,
    pub min_size: u32,
    pub desired_size: u32,
    pub max_size: u32,
    pub service_account: String,
}

impl Default for TopologyParams {
    fn default() -> Self {
        Self {
            vpc_cidr: "10.0.0.0/16".to_string(),
            subnet_cidrs: ["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
            availability_zones: ["us-east-1a".to_string(), "us-east-1b".to_string()],
            cluster_version: "1.24".to_string(),
            instance_type: "t3.medium".to_string(),
            min_size: 1,
            desired_size: 2,
            max_size: 2,
            service_account: "system:serviceaccount:default:example-sa".to_string(),
        }
    }
}

fn tags(name: &str) -> serde_json::Value {
    json!({ "Name": name })
}

fn service_trust(service: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service }
        }]
    })
}

/// Build the full topology graph and its export registrations.
pub fn build(params: &TopologyParams) -> Result<(Graph, OutputExporter)> {
    let mut builder = GraphBuilder::new();

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Network, "eks-vpc")
            .attr("cidr_block", params.vpc_cidr.as_str())
            .attr("instance_tenancy", "default")
            .attr("enable_dns_hostnames", true)
            .attr("enable_dns_support", true)
            .attr("tags", tags("eks-vpc")),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Gateway, "eks-igw")
            .attr_ref("vpc_id", "eks-vpc", "id")
            .attr("tags", tags("eks-igw")),
    )?;

    for (i, (cidr, zone)) in params
        .subnet_cidrs
        .iter()
        .zip(params.availability_zones.iter())
        .enumerate()
    {
        let name = format!("eks-public-subnet-{}", i + 1);
        builder.add_resource(
            ResourceDescriptor::new(ResourceKind::Subnet, name.clone())
                .attr_ref("vpc_id", "eks-vpc", "id")
                .attr("cidr_block", cidr.as_str())
                .attr("availability_zone", zone.as_str())
                .attr("map_public_ip_on_launch", true)
                .attr("tags", tags(&name)),
        )?;
    }

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::RouteTable, "eks-public-rt")
            .attr_ref("vpc_id", "eks-vpc", "id")
            .attr("route_cidr_block", "0.0.0.0/0")
            .attr_ref("route_gateway_id", "eks-igw", "id")
            .attr("tags", tags("eks-public-rt")),
    )?;

    for i in 1..=2 {
        builder.add_resource(
            ResourceDescriptor::new(ResourceKind::RouteAssociation, format!("eks-rta-{i}"))
                .attr_ref("subnet_id", &format!("eks-public-subnet-{i}"), "id")
                .attr_ref("route_table_id", "eks-public-rt", "id"),
        )?;
    }

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Role, "eks-role")
            .attr("assume_role_policy", service_trust("eks.amazonaws.com")),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::PolicyAttachment, "eks-policy")
            .attr_ref("role", "eks-role", "name")
            .attr("policy_arn", CLUSTER_POLICY),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Cluster, "eks-cluster")
            .attr_ref("role_arn", "eks-role", "arn")
            .attr("version", params.cluster_version.as_str())
            .attr_ref("subnet_id_1", "eks-public-subnet-1", "id")
            .attr_ref("subnet_id_2", "eks-public-subnet-2", "id")
            .attr("tags", tags("eks-cluster")),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Role, "eks-node-group-role")
            .attr("assume_role_policy", service_trust("ec2.amazonaws.com")),
    )?;

    for (suffix, policy_arn) in [
        ("AmazonEKSWorkerNodePolicy", WORKER_NODE_POLICY),
        ("AmazonEKS_CNI_Policy", CNI_POLICY),
        ("AmazonEC2ContainerRegistryReadOnly", ECR_READONLY_POLICY),
    ] {
        builder.add_resource(
            ResourceDescriptor::new(
                ResourceKind::PolicyAttachment,
                format!("eks-node-group-policy-{suffix}"),
            )
            .attr_ref("role", "eks-node-group-role", "name")
            .attr("policy_arn", policy_arn),
        )?;
    }

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::NodeGroup, "eks-node-group")
            .attr_ref("cluster_name", "eks-cluster", "name")
            .attr_ref("node_role_arn", "eks-node-group-role", "arn")
            .attr_ref("subnet_id_1", "eks-public-subnet-1", "id")
            .attr_ref("subnet_id_2", "eks-public-subnet-2", "id")
            .attr("desired_size", params.desired_size)
            .attr("max_size", params.max_size)
            .attr("min_size", params.min_size)
            .attr("instance_type", params.instance_type.as_str())
            .attr("tags", tags("eks-node-group")),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::OidcProvider, "eks-oidc")
            .attr("client_id", OIDC_CLIENT_ID)
            .attr("thumbprint", OIDC_THUMBPRINT)
            .attr_ref("url", "eks-cluster", "oidc_issuer"),
    )?;

    // The trust document is composed by the collaborator from both resolved
    // OIDC values plus the service account subject.
    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::Role, "pod-execution-role")
            .attr_ref("federated_arn", "eks-oidc", "arn")
            .attr_ref("issuer_url", "eks-oidc", "url")
            .attr("service_account", params.service_account.as_str()),
    )?;

    builder.add_resource(
        ResourceDescriptor::new(ResourceKind::PolicyAttachment, "pod-execution-role-policy")
            .attr_ref("role", "pod-execution-role", "name")
            .attr("policy_arn", CNI_POLICY),
    )?;

    let graph = builder.build()?;

    let mut exporter = OutputExporter::new();
    exporter.export("cluster-name", "eks-cluster", "name")?;
    exporter.export("cluster-endpoint", "eks-cluster", "endpoint")?;
    exporter.export("cluster-certificate-authority", "eks-cluster", "certificate_authority")?;
    exporter.export("cluster-role-arn", "eks-role", "arn")?;
    exporter.export("pod-role-name", "pod-execution-role", "name")?;

    Ok((graph, exporter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::applier::{apply, apply_and_export, ApplyOptions};
    use crate::core::types::NodeOutcome;
    use crate::provider::sim::SimulatedCloud;
    use crate::provider::Provisioner;
    use std::sync::Arc;

    fn built() -> (Graph, OutputExporter) {
        build(&TopologyParams::default()).unwrap()
    }

    fn position(order: &[String], name: &str) -> usize {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{name} missing from order"))
    }

    #[test]
    fn test_topology_shape() {
        let (graph, exporter) = built();
        assert_eq!(graph.len(), 18);
        assert_eq!(exporter.len(), 5);
        assert_eq!(graph.edge_count(), 23);
    }

    #[test]
    fn test_network_first_pod_attachment_last() {
        let (graph, _) = built();
        let order = graph.execution_order();
        assert_eq!(order.first().unwrap(), "eks-vpc");
        assert_eq!(order.last().unwrap(), "pod-execution-role-policy");
    }

    #[test]
    fn test_order_satisfies_every_topology_constraint() {
        let (graph, _) = built();
        let order = graph.execution_order();
        let before = |a: &str, b: &str| {
            assert!(
                position(&order, a) < position(&order, b),
                "{a} must precede {b}"
            );
        };

        before("eks-vpc", "eks-igw");
        before("eks-vpc", "eks-public-subnet-1");
        before("eks-vpc", "eks-public-subnet-2");
        before("eks-igw", "eks-public-rt");
        before("eks-public-subnet-1", "eks-rta-1");
        before("eks-public-subnet-2", "eks-rta-2");
        before("eks-public-rt", "eks-rta-1");
        before("eks-public-rt", "eks-rta-2");
        before("eks-role", "eks-policy");
        before("eks-role", "eks-cluster");
        before("eks-public-subnet-1", "eks-cluster");
        before("eks-public-subnet-2", "eks-cluster");
        before("eks-cluster", "eks-node-group");
        before("eks-node-group-role", "eks-node-group");
        before("eks-cluster", "eks-oidc");
        before("eks-oidc", "pod-execution-role");
        before("pod-execution-role", "pod-execution-role-policy");
    }

    #[test]
    fn test_same_wave_resources_are_independent() {
        let (graph, _) = built();
        let waves = graph.waves();
        let subnet_wave = waves
            .iter()
            .find(|w| w.contains(&"eks-public-subnet-1".to_string()))
            .unwrap();
        assert!(subnet_wave.contains(&"eks-public-subnet-2".to_string()));

        let attachment_wave = waves
            .iter()
            .find(|w| w.contains(&"eks-node-group-policy-AmazonEKS_CNI_Policy".to_string()))
            .unwrap();
        assert!(attachment_wave.contains(&"eks-node-group-policy-AmazonEKSWorkerNodePolicy".to_string()));
        assert!(attachment_wave.contains(&"eks-node-group-policy-AmazonEC2ContainerRegistryReadOnly".to_string()));
    }

    #[tokio::test]
    async fn test_full_apply_exports_match_resolved_outputs() {
        let (graph, exporter) = built();
        let cloud = Arc::new(SimulatedCloud::new());
        let outcome = apply(
            &graph,
            Arc::clone(&cloud) as Arc<dyn Provisioner>,
            &ApplyOptions::default(),
        )
        .await
        .unwrap();
        assert!(outcome.report.is_success());
        assert_eq!(outcome.report.provisioned, 18);

        let exports = exporter.collect(&outcome.outputs).unwrap();
        let keys: Vec<_> = exports.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "cluster-name",
                "cluster-endpoint",
                "cluster-certificate-authority",
                "cluster-role-arn",
                "pod-role-name",
            ]
        );
        assert_eq!(
            &exports["cluster-name"],
            outcome.outputs.value("eks-cluster", "name").unwrap()
        );
        assert_eq!(
            &exports["cluster-endpoint"],
            outcome.outputs.value("eks-cluster", "endpoint").unwrap()
        );
        assert_eq!(
            &exports["cluster-role-arn"],
            outcome.outputs.value("eks-role", "arn").unwrap()
        );
        assert_eq!(
            &exports["pod-role-name"],
            outcome.outputs.value("pod-execution-role", "name").unwrap()
        );
    }

    #[tokio::test]
    async fn test_cluster_failure_never_starts_dependents() {
        let (graph, _) = built();
        let cloud = Arc::new(SimulatedCloud::new());
        cloud.fail_on("eks-cluster");
        let outcome = apply(
            &graph,
            Arc::clone(&cloud) as Arc<dyn Provisioner>,
            &ApplyOptions::default(),
        )
        .await
        .unwrap();

        assert!(!outcome.report.is_success());
        assert_eq!(
            outcome.report.outcomes["eks-node-group"],
            NodeOutcome::NeverStarted
        );
        assert_eq!(outcome.report.outcomes["eks-oidc"], NodeOutcome::NeverStarted);
        let log = cloud.call_log();
        assert!(!log.contains(&"eks-node-group".to_string()));
        assert!(!log.contains(&"eks-oidc".to_string()));
        assert!(!log.contains(&"pod-execution-role".to_string()));
    }

    #[tokio::test]
    async fn test_reapply_topology_is_noop() {
        let (graph, _) = built();
        let cloud = Arc::new(SimulatedCloud::new());
        let first = apply(
            &graph,
            Arc::clone(&cloud) as Arc<dyn Provisioner>,
            &ApplyOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(first.report.provisioned, 18);

        let second = apply(
            &graph,
            Arc::clone(&cloud) as Arc<dyn Provisioner>,
            &ApplyOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(second.report.unchanged, 18);
        assert_eq!(second.report.provisioned, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subnet_completion_order_does_not_affect_exports() {
        let (graph, exporter) = built();

        let unbounded = apply_and_export(
            &graph,
            &exporter,
            Arc::new(SimulatedCloud::new()),
            &ApplyOptions::default(),
        )
        .await
        .unwrap();

        let serial = apply_and_export(
            &graph,
            &exporter,
            Arc::new(SimulatedCloud::new()),
            &ApplyOptions::with_limit(1),
        )
        .await
        .unwrap();

        assert_eq!(unbounded, serial);
    }

    #[tokio::test]
    async fn test_pod_role_trust_composed_from_resolved_oidc() {
        let (graph, _) = built();
        let cloud = Arc::new(SimulatedCloud::new());
        let outcome = apply(
            &graph,
            Arc::clone(&cloud) as Arc<dyn Provisioner>,
            &ApplyOptions::default(),
        )
        .await
        .unwrap();

        let oidc_arn = outcome.outputs.value("eks-oidc", "arn").unwrap();
        let trust = outcome
            .outputs
            .value("pod-execution-role", "assume_role_policy")
            .unwrap();
        assert_eq!(&trust["Statement"][0]["Principal"]["Federated"], oidc_arn);
    }

    #[test]
    fn test_default_params_match_canonical_deployment() {
        let params = TopologyParams::default();
        assert_eq!(params.vpc_cidr, "10.0.0.0/16");
        assert_eq!(params.availability_zones[1], "us-east-1b");
        assert_eq!(params.cluster_version, "1.24");
        assert_eq!(params.instance_type, "t3.medium");
        assert_eq!(
            (params.min_size, params.desired_size, params.max_size),
            (1, 2, 2)
        );
    }
}
