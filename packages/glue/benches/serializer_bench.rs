use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tether_glue::{
    CircularSerializer, ElementType, GlueBuilder, GlueGraph, NativeList, NativeObject,
    NativeValue, SessionRegistry, VisitedSet,
};

fn skills(count: usize) -> Arc<NativeObject> {
    let root = NativeObject::new("Person");
    let items = (0..count)
        .map(|i| {
            let skill = NativeObject::with_properties(
                "Skill",
                [
                    ("Name", NativeValue::String(format!("skill-{}", i))),
                    ("Level", NativeValue::Int(i as i64)),
                ],
            );
            skill.define("Owner", NativeValue::Object(root.clone()));
            NativeValue::Object(skill)
        })
        .collect();
    root.define(
        "Skills",
        NativeList::with_items(ElementType::Object("Skill".into()), items).into(),
    );
    root
}

fn serialize_cyclic_graph(c: &mut Criterion) {
    let mut graph = GlueGraph::new();
    let mut registry = SessionRegistry::new();
    let root = GlueBuilder::new(&mut graph, &mut registry)
        .wrap(&skills(500).into())
        .unwrap();
    let visited = VisitedSet::new();

    c.bench_function("serialize_cyclic_graph_500", |b| {
        b.iter(|| {
            CircularSerializer::new(&graph)
                .serialize(black_box(&root), &visited)
                .unwrap()
        })
    });
}

fn wrap_cyclic_graph(c: &mut Criterion) {
    let root = NativeValue::Object(skills(500));

    c.bench_function("wrap_cyclic_graph_500", |b| {
        b.iter(|| {
            let mut graph = GlueGraph::new();
            let mut registry = SessionRegistry::new();
            GlueBuilder::new(&mut graph, &mut registry)
                .wrap(black_box(&root))
                .unwrap()
        })
    });
}

criterion_group!(benches, serialize_cyclic_graph, wrap_cyclic_graph);
criterion_main!(benches);
