use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rig_graph_core::{
    compile_limb, evaluate, parse_config, parse_hierarchy, EvalContext, JointId, RigGraph,
    ShapeLibrary,
};
use rig_test_fixtures::{configs, hierarchies};

fn bench_compile_limb(c: &mut Criterion) {
    let hierarchy = parse_hierarchy(&hierarchies::json("arm").unwrap()).unwrap();
    let config = parse_config(&configs::json("arm_l").unwrap()).unwrap();
    let mut library = ShapeLibrary::builtin();
    library.extend(ShapeLibrary::from_json(&rig_test_fixtures::shapes::json("extra").unwrap()).unwrap());

    c.bench_function("compile_limb_arm", |b| {
        b.iter(|| {
            let mut graph = RigGraph::new();
            let rig = compile_limb(&mut graph, &hierarchy, JointId(0), &library, &config).unwrap();
            black_box((graph, rig))
        })
    });
}

fn bench_evaluate_limb(c: &mut Criterion) {
    let hierarchy = parse_hierarchy(&hierarchies::json("arm").unwrap()).unwrap();
    let config = parse_config(&configs::json("arm_l").unwrap()).unwrap();
    let mut library = ShapeLibrary::builtin();
    library.extend(ShapeLibrary::from_json(&rig_test_fixtures::shapes::json("extra").unwrap()).unwrap());
    let mut graph = RigGraph::new();
    let rig = compile_limb(&mut graph, &hierarchy, JointId(0), &library, &config).unwrap();
    let mut ctx = EvalContext::new();
    ctx.set_attr(rig.controls.host.ctl, "IkFkSwitch", 0.5);

    c.bench_function("evaluate_limb_arm", |b| {
        b.iter(|| black_box(evaluate(black_box(&graph), &ctx).unwrap()))
    });
}

criterion_group!(benches, bench_compile_limb, bench_evaluate_limb);
criterion_main!(benches);
