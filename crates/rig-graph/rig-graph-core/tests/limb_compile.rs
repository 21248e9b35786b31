use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use rig_graph_core::compile::limb::{ChainTag, FOLLOW_TRANSLATION, IK_FK_SWITCH, MAX_SQUASH, MAX_STRETCH};
use rig_graph_core::graph::ScalarContext;
use rig_graph_core::{
    compile_limb, evaluate, parse_config, parse_hierarchy, AttrRef, BlendMode, Channel,
    CompileError, CompilerConfig, ControlRole, EvalContext, GraphError, JointHierarchy, JointId,
    LimbRig, NodeId, RigGraph, ShapeLibrary, StructuralError,
};
use rig_test_fixtures::{configs, hierarchies, shapes};

fn library() -> ShapeLibrary {
    let mut lib = ShapeLibrary::builtin();
    lib.extend(ShapeLibrary::from_json(&shapes::json("extra").expect("shape fixture")).expect("shapes parse"));
    lib
}

fn load(hierarchy: &str, config: &str) -> (JointHierarchy, CompilerConfig) {
    let h = parse_hierarchy(&hierarchies::json(hierarchy).expect("hierarchy fixture")).expect("hierarchy parses");
    let c = parse_config(&configs::json(config).expect("config fixture")).expect("config parses");
    (h, c)
}

fn arm() -> (RigGraph, LimbRig, JointHierarchy) {
    let (h, cfg) = load("arm", "arm_l");
    let mut g = RigGraph::new();
    let rig = compile_limb(&mut g, &h, JointId(0), &library(), &cfg).expect("arm compiles");
    (g, rig, h)
}

/// Pose `node` so that its world transform moves by `offset` in world space.
fn move_world(ctx: &mut EvalContext, g: &RigGraph, node: NodeId, offset: Vec3) {
    let n = g.node(node).unwrap();
    let parent = n.parent.map(|p| g.node(p).unwrap().world).unwrap_or(Mat4::IDENTITY);
    ctx.set_local(node, parent.inverse() * Mat4::from_translation(offset) * n.world);
}

struct SwitchAt(f32);

impl ScalarContext for SwitchAt {
    fn attr(&self, _: &AttrRef) -> Result<f32, GraphError> {
        Ok(self.0)
    }

    fn position(&self, node: NodeId) -> Result<Vec3, GraphError> {
        Err(GraphError::UnknownNode(node))
    }
}

#[test]
fn builds_named_chains_and_controls() {
    let (g, rig, h) = arm();
    assert_eq!(rig.bind.len(), 3);
    assert_eq!(g.node(rig.bind[0]).unwrap().name, "arm_l_shoulder_bnd");
    assert_eq!(g.node(rig.fk[1]).unwrap().name, "arm_l_elbow_fk");
    assert_eq!(g.node(rig.ik[2]).unwrap().name, "arm_l_wrist_ik");
    assert_eq!(g.node(rig.stretch[0]).unwrap().name, "arm_l_shoulder_stretch");
    assert_eq!(rig.duplicates.len(), 9);
    assert_eq!(rig.duplicates.get(JointId(1), ChainTag::Ik), Some(rig.ik[1]));
    // the hand joint is beyond the limb
    assert!(h.find("arm_l_hand_bnd").is_some());
    assert!(g.find("arm_l_hand_fk").is_none());

    for role in [
        ControlRole::Host,
        ControlRole::Fk1,
        ControlRole::Fk2,
        ControlRole::Fk3,
        ControlRole::Pole,
        ControlRole::Root,
        ControlRole::Ik,
    ] {
        let ctl = rig.controls.get(role).unwrap().ctl;
        assert_eq!(g.role(role).unwrap().id, ctl, "{role:?}");
    }
    let pole = g.node(rig.controls.pole.ctl).unwrap();
    assert_eq!(pole.shape.as_ref().unwrap().key, "diamond");
}

#[test]
fn pole_sits_at_average_length_times_factor() {
    let (g, rig, h) = arm();
    let p = h.positions(&[JointId(0), JointId(1), JointId(2)]).unwrap();
    let avg = (p[0].distance(p[1]) + p[1].distance(p[2])) * 0.5;
    let pole = g.node(rig.controls.pole.ctl).unwrap().position();
    assert!((pole.distance(p[1]) - avg * 2.0).abs() < 1e-4);
    // the elbow bends towards -z, so the pole does too
    assert!(pole.z < p[1].z);
}

#[test]
fn straight_chain_falls_back_to_up_vector() {
    let (h, cfg) = load("leg_straight", "leg_l");
    let mut g = RigGraph::new();
    let rig = compile_limb(&mut g, &h, JointId(0), &library(), &cfg).unwrap();
    let pole = g.node(rig.controls.pole.ctl).unwrap().position();
    assert!(pole.distance(Vec3::new(5.0, 16.0, 0.0)) < 1e-4);
    // trailing digit of the source name survives substitution
    assert!(g.find("leg_l_hip_fk1").is_some());
}

#[test]
fn short_chain_is_rejected_before_any_node() {
    let h = parse_hierarchy(&hierarchies::json("spine_short").unwrap()).unwrap();
    let mut g = RigGraph::new();
    let err = compile_limb(&mut g, &h, JointId(0), &library(), &CompilerConfig::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::Structural(StructuralError::InsufficientChainLength {
            root: "spine_0_bnd".into(),
            found: 2,
            required: 3,
        })
    );
    assert!(g.is_empty());
}

#[test]
fn ik_fk_weights_sum_to_one() {
    let (g, rig, _) = arm();
    for bind in &rig.bind {
        let edge = g
            .edges_for(*bind)
            .find(|e| e.mode == BlendMode::PoleReverseSwitch)
            .unwrap();
        assert_eq!(edge.channel, Channel::All);
        assert_eq!(edge.sources.len(), 2);
        for s in [0.0, 0.25, 0.5, 1.0] {
            let total: f32 = edge
                .sources
                .iter()
                .map(|src| src.weight.eval(&SwitchAt(s)).unwrap())
                .sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }
    assert_eq!(rig.switch.attr, IK_FK_SWITCH);
    assert_eq!(rig.switch.node, rig.controls.host.ctl);
}

#[test]
fn fk_mode_follows_fk_controls() {
    let (g, rig, _) = arm();
    let offset = Vec3::new(0.0, 1.0, 0.0);
    let mut ctx = EvalContext::new();
    move_world(&mut ctx, &g, rig.controls.fk[0].ctl, offset);
    let out = evaluate(&g, &ctx).unwrap();
    for (i, bind) in rig.bind.iter().enumerate() {
        let rest = g.node(*bind).unwrap().position();
        let now = out.position(*bind).unwrap();
        assert!(now.distance(rest + offset) < 1e-4, "bind {i}: {now} vs {}", rest + offset);
    }
}

#[test]
fn follow_translation_decouples_fk_controls() {
    let (g, rig, _) = arm();
    let offset = Vec3::new(0.0, 1.0, 0.0);
    let mut ctx = EvalContext::new();
    move_world(&mut ctx, &g, rig.controls.fk[0].ctl, offset);
    ctx.set_attr(rig.controls.fk[1].ctl, FOLLOW_TRANSLATION, 0.0);
    let out = evaluate(&g, &ctx).unwrap();
    let elbow_rest = g.node(rig.bind[1]).unwrap().position();
    assert!(out.position(rig.bind[0]).unwrap().distance(g.node(rig.bind[0]).unwrap().position() + offset) < 1e-4);
    assert!(out.position(rig.bind[1]).unwrap().distance(elbow_rest) < 1e-4);
}

#[test]
fn ik_mode_follows_root_control() {
    let (g, rig, _) = arm();
    let offset = Vec3::new(0.0, 0.0, 0.5);
    let mut ctx = EvalContext::new();
    ctx.set_attr(rig.controls.host.ctl, IK_FK_SWITCH, 1.0);
    move_world(&mut ctx, &g, rig.controls.root.ctl, offset);
    let out = evaluate(&g, &ctx).unwrap();
    let rest = g.node(rig.bind[0]).unwrap().position();
    assert!(out.position(rig.bind[0]).unwrap().distance(rest + offset) < 1e-4);
}

fn straight_leg() -> (RigGraph, LimbRig) {
    let (h, cfg) = load("leg_straight", "leg_l");
    let mut g = RigGraph::new();
    let rig = compile_limb(&mut g, &h, JointId(0), &library(), &cfg).expect("leg compiles");
    (g, rig)
}

#[test]
fn stretch_chain_duplicates_the_bind_pose() {
    let (g, rig, h) = arm();
    let p = h.positions(&[JointId(0), JointId(1), JointId(2)]).unwrap();
    for (i, s) in rig.stretch.iter().enumerate() {
        assert!(g.node(*s).unwrap().position().distance(p[i]) < 1e-6);
        assert_eq!(g.node(*s).unwrap().world, g.node(rig.bind[i]).unwrap().world);
    }
    let reference = p[0].distance(p[1]) + p[1].distance(p[2]);
    assert!((rig.stretch_driver.reference_length - reference).abs() < 1e-5);
}

#[test]
fn bent_limb_keeps_unit_scale_at_rest() {
    let (g, rig, _) = arm();
    for squash in [0.0, 0.5, 1.0] {
        let mut ctx = EvalContext::new();
        ctx.set_attr(rig.controls.host.ctl, MAX_SQUASH, squash);
        let out = evaluate(&g, &ctx).unwrap();
        for ik in &rig.ik[..2] {
            let scale = out.driven(*ik, "scaleX").unwrap();
            assert!((scale - 1.0).abs() < 1e-5, "maxSquash {squash}: {scale}");
        }
    }
}

#[test]
fn stretch_and_squash_golden_values() {
    let (g, rig) = straight_leg();
    let reference = rig.stretch_driver.reference_length;
    assert!((reference - 8.0).abs() < 1e-5);

    let mut ctx = EvalContext::new();
    move_world(&mut ctx, &g, rig.controls.ik.ctl, Vec3::X * (0.2 * reference));
    let out = evaluate(&g, &ctx).unwrap();
    for ik in &rig.ik[..2] {
        assert!((out.driven(*ik, "scaleX").unwrap() - 1.2).abs() < 1e-4);
    }

    let mut ctx = EvalContext::new();
    ctx.set_attr(rig.controls.host.ctl, MAX_SQUASH, 0.5);
    move_world(&mut ctx, &g, rig.controls.ik.ctl, Vec3::X * (-0.2 * reference));
    let out = evaluate(&g, &ctx).unwrap();
    assert!((out.driven(rig.ik[0], "scaleX").unwrap() - 0.8).abs() < 1e-4);

    // squash is off by default
    let mut ctx = EvalContext::new();
    move_world(&mut ctx, &g, rig.controls.ik.ctl, Vec3::X * (-0.2 * reference));
    let out = evaluate(&g, &ctx).unwrap();
    assert!((out.driven(rig.ik[0], "scaleX").unwrap() - 1.0).abs() < 1e-6);

    // clamped by maxStretch
    let mut ctx = EvalContext::new();
    move_world(&mut ctx, &g, rig.controls.ik.ctl, Vec3::X * (2.0 * reference));
    let out = evaluate(&g, &ctx).unwrap();
    assert!((out.driven(rig.ik[0], "scaleX").unwrap() - 1.5).abs() < 1e-4);
}

#[test]
fn bent_limb_stretch_follows_live_chain_length() {
    let (g, rig, _) = arm();
    let mut ctx = EvalContext::new();
    ctx.set_attr(rig.controls.host.ctl, MAX_STRETCH, 10.0);
    move_world(&mut ctx, &g, rig.controls.ik.ctl, Vec3::new(2.0, 0.0, 0.0));
    let out = evaluate(&g, &ctx).unwrap();
    let live: Vec<Vec3> = rig.stretch.iter().map(|s| out.position(*s).unwrap()).collect();
    let length = live[0].distance(live[1]) + live[1].distance(live[2]);
    let expected = length / rig.stretch_driver.reference_length;
    assert!(expected > 1.0);
    assert!((out.driven(rig.ik[0], "scaleX").unwrap() - expected).abs() < 1e-4);
}

#[test]
fn rebuilding_into_the_same_graph_gets_fresh_group() {
    let (h, cfg) = load("arm", "arm_l");
    let mut g = RigGraph::new();
    let first = compile_limb(&mut g, &h, JointId(0), &library(), &cfg).unwrap();
    let mut cfg2 = cfg.clone();
    cfg2.limb.prefix = "arm_r".into();
    let second = compile_limb(&mut g, &h, JointId(0), &library(), &cfg2).unwrap();
    assert_ne!(first.group, second.group);
    assert_eq!(g.node(second.group).unwrap().name, "arm_r_grp");
    g.topological_order().unwrap();
}

#[test]
fn host_tracks_wrist() {
    let (g, rig, _) = arm();
    let edges: HashMap<Channel, BlendMode> = g
        .edges_for(rig.controls.host.srt)
        .map(|e| (e.channel, e.mode))
        .collect();
    assert_eq!(edges.get(&Channel::Translate), Some(&BlendMode::WeightedAverage));
}
