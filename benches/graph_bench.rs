//! Benchmarks for graph construction, ordering, and apply.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cumulo::core::applier::{apply, ApplyOptions};
use cumulo::core::graph::GraphBuilder;
use cumulo::core::types::{AttrMap, ResourceDescriptor, ResourceKind};
use cumulo::core::planner;
use cumulo::provenance::hasher;
use cumulo::provider::sim::SimulatedCloud;
use cumulo::provider::Provisioner;
use cumulo::topology::{self, TopologyParams};
use std::sync::Arc;

fn bench_topology_build(c: &mut Criterion) {
    let params = TopologyParams::default();
    c.bench_function("topology_build", |b| {
        b.iter(|| {
            let (graph, exporter) = topology::build(black_box(&params)).unwrap();
            black_box((graph.len(), exporter.len()));
        });
    });
}

fn bench_execution_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_order");
    for chain_len in [10usize, 100, 500] {
        let mut builder = GraphBuilder::new();
        for i in 0..chain_len {
            let mut d = ResourceDescriptor::new(ResourceKind::Network, format!("node-{i}"));
            if i > 0 {
                d = d.attr_ref("upstream", &format!("node-{}", i - 1), "id");
            }
            builder.add_resource(d).unwrap();
        }
        let graph = builder.build().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(chain_len), &graph, |b, graph| {
            b.iter(|| black_box(graph.execution_order()));
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let (graph, _) = topology::build(&TopologyParams::default()).unwrap();
    c.bench_function("plan_topology", |b| {
        b.iter(|| black_box(planner::plan(black_box(&graph))));
    });
}

fn bench_attr_hash(c: &mut Criterion) {
    let mut attrs = AttrMap::new();
    attrs.insert("cidr_block".to_string(), "10.0.0.0/16".into());
    attrs.insert("enable_dns_hostnames".to_string(), true.into());
    attrs.insert("instance_tenancy".to_string(), "default".into());
    c.bench_function("hash_attrs", |b| {
        b.iter(|| black_box(hasher::hash_attrs(black_box(&attrs))));
    });
}

fn bench_apply_topology(c: &mut Criterion) {
    let (graph, _) = topology::build(&TopologyParams::default()).unwrap();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("apply_topology_simulated", |b| {
        b.iter(|| {
            let cloud = Arc::new(SimulatedCloud::new());
            let outcome = runtime
                .block_on(apply(
                    &graph,
                    Arc::clone(&cloud) as Arc<dyn Provisioner>,
                    &ApplyOptions::default(),
                ))
                .unwrap();
            black_box(outcome.report.provisioned);
        });
    });
}

criterion_group!(
    benches,
    bench_topology_build,
    bench_execution_order,
    bench_plan,
    bench_attr_hash,
    bench_apply_topology
);
criterion_main!(benches);
