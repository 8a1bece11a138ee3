// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks the memory-driven partition flow over deep synthetic
//! chains.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use device_registry::{
    Backend, BackendOptions, BackendRegistry, DeviceError, DeviceInfo, RuntimeBundle,
};
use graph_ir::{ElemType, Function, Module, Node, NodeKind, Shape, TypeDesc, ValueRef};
use partitioner::{CompilationContext, Partitioner};
use std::collections::BTreeMap;
use std::sync::Arc;

struct AnyBackend;

impl Backend for AnyBackend {
    fn name(&self) -> &str {
        "bench"
    }

    fn is_op_supported(&self, _node: &Node) -> bool {
        true
    }

    fn compile(
        &self,
        func: &Function,
        _module: &Module,
        _opts: &BackendOptions,
    ) -> Result<RuntimeBundle, DeviceError> {
        Ok(RuntimeBundle {
            name: func.name().to_string(),
            symbol_table: BTreeMap::new(),
            constant_bytes: 0,
        })
    }
}

fn chain_module(n: usize) -> Module {
    let ty = |elems: usize| TypeDesc::new(Shape::vector(elems), ElemType::F32);
    let mut m = Module::new();
    let input = m.add_placeholder("input", ty(256));
    let result = m.add_placeholder("result", ty(256));
    let mut f = Function::new("bench_net");
    let mut prev = None;
    for i in 0..n {
        let w = m.add_constant(format!("w{i}"), ty(16 * 1024));
        let src = match prev {
            None => ValueRef::Placeholder(input),
            Some(p) => ValueRef::output_of(p),
        };
        let id = f
            .add_node(Node::new(
                format!("conv{i}"),
                NodeKind::Conv,
                vec![src, ValueRef::Constant(w)],
                vec![ty(256)],
            ))
            .unwrap();
        prev = Some(id);
    }
    f.add_node(Node::new(
        "out",
        NodeKind::Save,
        vec![
            ValueRef::output_of(prev.unwrap()),
            ValueRef::Placeholder(result),
        ],
        vec![ty(256)],
    ))
    .unwrap();
    m.insert_function(f).unwrap();
    m
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_driven_partition");
    for &n in &[64usize, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut registry = BackendRegistry::new();
            registry.register(Arc::new(AnyBackend));
            // Budget forces roughly eight nodes per partition; enough
            // devices that every partition finds a logical slot.
            let devices: Vec<DeviceInfo> = (0..64)
                .map(|_| DeviceInfo::new("bench", 600 * 1024))
                .collect();
            b.iter(|| {
                let mut module = chain_module(n);
                let partitioner = Partitioner::new(devices.clone(), registry.clone());
                partitioner
                    .partition(&mut module, &CompilationContext::new())
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_partition);
criterion_main!(benches);
