use glam::{Mat4, Vec3};
use rig_graph_core::graph::Lock;
use rig_graph_core::{
    compile_cage, evaluate, BindPlan, CageMesh, CageRig, CompileError, CompilerConfig,
    ControlRole, EvalContext, Influence, InfluenceSet, NodeId, NodeKind, ResourceError, RigGraph,
    ShapeLibrary,
};

fn quad() -> CageMesh {
    CageMesh {
        name: "body_cage".into(),
        vertices: vec![
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(2.0, 1.0, 0.0),
            Vec3::new(2.0, 1.0, 2.0),
            Vec3::new(0.0, 1.0, 2.0),
        ],
        normals: vec![Vec3::Y, Vec3::Y, Vec3::Z, Vec3::X],
        edges: vec![[0, 1], [1, 2], [2, 3], [3, 0], [0, 1], [2, 1]],
    }
}

fn influence(node: NodeId, weight: f32) -> Influence {
    Influence { node, weight }
}

/// Three free-standing deformers and a cage riding on them.
fn rigged() -> (RigGraph, [NodeId; 3], CageRig) {
    let mut g = RigGraph::new();
    let a = g.add_node("spine_a", NodeKind::Joint, Mat4::from_translation(Vec3::ZERO));
    let b = g.add_node("spine_b", NodeKind::Joint, Mat4::from_translation(Vec3::Y * 2.0));
    let c = g.add_node("spine_c", NodeKind::Joint, Mat4::from_translation(Vec3::Y * 4.0));
    let bindings = vec![
        InfluenceSet::single(a),
        InfluenceSet::new(vec![influence(a, 0.75), influence(b, 0.25)]),
        InfluenceSet::new(vec![influence(a, 0.5), influence(b, 0.25), influence(c, 0.25)]),
        InfluenceSet::single(c),
    ];
    let rig = compile_cage(
        &mut g,
        &quad(),
        &bindings,
        &ShapeLibrary::builtin(),
        &CompilerConfig::default(),
    )
    .unwrap();
    (g, [a, b, c], rig)
}

#[test]
fn plans_follow_influence_count() {
    let (_, [a, b, c], rig) = rigged();
    assert_eq!(rig.vertices[0].plan, BindPlan::Parent { node: a });
    assert_eq!(
        rig.vertices[1].plan,
        BindPlan::Lerp {
            base: a,
            target: b,
            t: 0.25
        }
    );
    assert!(matches!(&rig.vertices[2].plan, BindPlan::WeightedSum { terms } if terms.len() == 3));
    assert_eq!(rig.vertices[3].plan, BindPlan::Parent { node: c });
}

#[test]
fn vertex_controls_ride_on_influences() {
    let (g, [a, _, _], rig) = rigged();
    let mut ctx = EvalContext::new();
    ctx.translate(&g, a, Vec3::X).unwrap();
    let out = evaluate(&g, &ctx).unwrap();
    let moved = |i: usize| {
        let ctl = rig.vertices[i].ctl;
        out.position(ctl).unwrap() - g.node(ctl).unwrap().position()
    };
    assert!(moved(0).distance(Vec3::X) < 1e-5);
    assert!(moved(1).distance(Vec3::X * 0.75) < 1e-5);
    assert!(moved(2).distance(Vec3::X * 0.5) < 1e-5);
    assert!(moved(3).length() < 1e-5);
}

#[test]
fn controls_are_shaped_locked_and_oriented() {
    let (g, _, rig) = rigged();
    let cfg = CompilerConfig::default();
    for (i, v) in rig.vertices.iter().enumerate() {
        let ctl = g.node(v.ctl).unwrap();
        assert_eq!(ctl.name, format!("body_cage_{i}_ctl"));
        assert_eq!(ctl.role, Some(ControlRole::CageVertex(i as u32)));
        assert!(ctl.locks.contains(&Lock::Rotate) && ctl.locks.contains(&Lock::Scale));
        let shape = ctl.shape.as_ref().unwrap();
        assert_eq!(shape.key, cfg.cage.control_shape);
        assert_eq!(shape.color, Some(cfg.cage.control_color));
        assert!(!g.node(v.bnd).unwrap().visible);
        assert!(!g.node(v.bpm).unwrap().visible);
        assert_eq!(g.node(v.bnd).unwrap().parent, Some(v.ctl));
        assert_eq!(g.node(v.bpm).unwrap().parent, Some(v.srt));
    }
    // control Y follows the vertex normal
    let up = g.node(rig.vertices[2].ctl).unwrap().world.transform_vector3(Vec3::Y);
    assert!(up.distance(Vec3::Z) < 1e-5);
}

#[test]
fn display_lines_cover_each_edge_once() {
    let (g, _, rig) = rigged();
    assert_eq!(rig.lines.len(), 4);
    let names: Vec<&str> = rig
        .lines
        .iter()
        .map(|l| g.node(*l).unwrap().name.as_str())
        .collect();
    assert_eq!(names, ["cageLine_0_1", "cageLine_1_2", "cageLine_2_3", "cageLine_3_0"]);
    for line in &rig.lines {
        assert_eq!(g.node(*line).unwrap().parent, Some(rig.display));
        let curve = g.curves().iter().find(|c| c.node == *line).unwrap();
        assert_eq!(curve.degree, 1);
        assert_eq!(curve.cvs.len(), 2);
    }
}

#[test]
fn cluster_binds_rest_pose_to_identity() {
    let (g, _, rig) = rigged();
    let skin = &g.skins()[0];
    assert_eq!(skin.name, "body_cage_cage_cluster");
    assert_eq!(skin.deformer, rig.mesh);
    assert_eq!(g.node(rig.mesh).unwrap().kind, NodeKind::Mesh);
    assert_eq!(skin.influences.len(), 4);
    assert_eq!(skin.bind_pre.len(), 4);

    let mut ctx = EvalContext::new();
    ctx.translate(&g, rig.vertices[1].ctl, Vec3::new(0.0, 0.5, 0.0)).unwrap();
    let out = evaluate(&g, &ctx).unwrap();
    for (i, (bnd, bpm)) in skin.influences.iter().zip(&skin.bind_pre).enumerate() {
        let skinning = out.world(*bnd).unwrap() * out.world(*bpm).unwrap().inverse();
        let moved = skinning.transform_point3(Vec3::ZERO);
        let expected = if i == 1 { Vec3::new(0.0, 0.5, 0.0) } else { Vec3::ZERO };
        assert!(moved.distance(expected) < 1e-5, "vertex {i}: {moved}");
    }
}

#[test]
fn bad_influence_is_attributed_to_its_vertex() {
    let mut g = RigGraph::new();
    let a = g.add_node("a", NodeKind::Joint, Mat4::IDENTITY);
    let mut bindings = vec![InfluenceSet::single(a); 4];
    bindings[2] = InfluenceSet::default();
    let err = compile_cage(
        &mut g,
        &quad(),
        &bindings,
        &ShapeLibrary::builtin(),
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.root_cause(),
        &CompileError::Resource(ResourceError::NoInfluence { point: 2 })
    );
    assert_eq!(g.len(), 1);
}

#[test]
fn unknown_shape_fails_before_building() {
    let mut g = RigGraph::new();
    let a = g.add_node("a", NodeKind::Joint, Mat4::IDENTITY);
    let mut cfg = CompilerConfig::default();
    cfg.cage.control_shape = "blob".into();
    let err = compile_cage(
        &mut g,
        &quad(),
        &vec![InfluenceSet::single(a); 4],
        &ShapeLibrary::builtin(),
        &cfg,
    )
    .unwrap_err();
    assert_eq!(err, CompileError::Resource(ResourceError::UnknownControlShape("blob".into())));
    assert_eq!(g.len(), 1);
}
