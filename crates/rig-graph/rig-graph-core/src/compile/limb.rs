//! Two-bone limb: bind chain, FK/IK/stretch duplicates, controls, IK/FK switch and
//! length-clamped stretch.

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::binder::{BindPlan, Influence, InfluenceSet};
use crate::config::CompilerConfig;
use crate::error::{CompileResult, StructuralError};
use crate::geometry::{aim_frame, chain_length, pole_vector_position_with_fallback};
use crate::graph::{
    AttrRef, AttrSpec, BlendMode, BlendSource, Channel, ControlRole, IkSolve, NodeKind, RigGraph,
    ScalarDriver, StretchDriver, WeightExpr,
};
use crate::ids::{JointId, NodeId};
use crate::joint::JointHierarchy;
use crate::shapes::ShapeLibrary;

use super::{add_control, commit, ControlRig, ControlSpec, Staged};

pub const LIMB_JOINTS: usize = 3;

pub const IK_FK_SWITCH: &str = "IkFkSwitch";
pub const FOLLOW_TRANSLATION: &str = "FollowTranslation";
pub const FOLLOW_ROTATION: &str = "FollowRotation";
pub const MAX_STRETCH: &str = "maxStretch";
pub const MAX_SQUASH: &str = "maxSquash";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTag {
    Fk,
    Ik,
    Stretch,
}

impl ChainTag {
    pub const ALL: [ChainTag; 3] = [ChainTag::Fk, ChainTag::Ik, ChainTag::Stretch];

    pub fn suffix(self) -> &'static str {
        match self {
            ChainTag::Fk => "_fk",
            ChainTag::Ik => "_ik",
            ChainTag::Stretch => "_stretch",
        }
    }
}

/// Source joint and chain tag to the duplicated node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMap {
    entries: HashMap<JointId, [Option<NodeId>; 3]>,
}

impl DuplicateMap {
    fn slot(tag: ChainTag) -> usize {
        match tag {
            ChainTag::Fk => 0,
            ChainTag::Ik => 1,
            ChainTag::Stretch => 2,
        }
    }

    pub fn insert(&mut self, joint: JointId, tag: ChainTag, node: NodeId) {
        self.entries.entry(joint).or_default()[Self::slot(tag)] = Some(node);
    }

    pub fn get(&self, joint: JointId, tag: ChainTag) -> Option<NodeId> {
        self.entries.get(&joint).and_then(|e| e[Self::slot(tag)])
    }

    pub fn len(&self) -> usize {
        self.entries.values().flatten().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Name of the `tag` duplicate of `source`.
///
/// The bind pattern is substituted when present, otherwise the tag is appended. A
/// trailing `1` left over from the host's collision suffix is stripped.
pub fn duplicate_name(source: &str, pattern: &str, tag: ChainTag, taken: impl Fn(&str) -> bool) -> String {
    if pattern.is_empty() || !source.contains(pattern) {
        return format!("{source}{}", tag.suffix());
    }
    let collided = taken(source);
    let duplicated = if collided {
        format!("{source}1")
    } else {
        source.to_string()
    };
    let mut name = duplicated.replacen(pattern, tag.suffix(), 1);
    if collided && name.ends_with('1') {
        name.pop();
    }
    name
}

/// Controls of a limb, one typed field per role.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimbControls {
    pub host: ControlRig,
    pub fk: [ControlRig; LIMB_JOINTS],
    pub pole: ControlRig,
    pub root: ControlRig,
    pub ik: ControlRig,
}

impl LimbControls {
    pub fn get(&self, role: ControlRole) -> Option<&ControlRig> {
        match role {
            ControlRole::Host => Some(&self.host),
            ControlRole::Fk1 => Some(&self.fk[0]),
            ControlRole::Fk2 => Some(&self.fk[1]),
            ControlRole::Fk3 => Some(&self.fk[2]),
            ControlRole::Pole => Some(&self.pole),
            ControlRole::Root => Some(&self.root),
            ControlRole::Ik => Some(&self.ik),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlRig> {
        [&self.host]
            .into_iter()
            .chain(self.fk.iter())
            .chain([&self.pole, &self.root, &self.ik])
    }
}

/// Everything the limb compiler created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimbRig {
    pub group: NodeId,
    pub bind: Vec<NodeId>,
    pub fk: Vec<NodeId>,
    pub ik: Vec<NodeId>,
    pub stretch: Vec<NodeId>,
    pub duplicates: DuplicateMap,
    pub controls: LimbControls,
    pub ik_handle: NodeId,
    pub switch: AttrRef,
    pub stretch_driver: StretchDriver,
}

struct Placement {
    positions: [Vec3; 3],
    frames: [Mat4; 3],
    pole: Vec3,
    lengths: (f32, f32),
}

fn place(positions: [Vec3; 3], config: &CompilerConfig) -> CompileResult<Placement> {
    let axes = config.limb.axes;
    let up = axes.up.unit();
    let pole = pole_vector_position_with_fallback(positions, config.limb.pole_distance, up)?;
    let bend = pole - positions[1];
    let aim_dirs = [
        positions[1] - positions[0],
        positions[2] - positions[1],
        positions[2] - positions[1],
    ];
    let mut frames = [Mat4::IDENTITY; 3];
    for i in 0..LIMB_JOINTS {
        frames[i] = aim_frame(
            positions[i],
            positions[i] + aim_dirs[i],
            bend,
            axes.primary,
            axes.secondary,
        )?;
    }
    Ok(Placement {
        positions,
        frames,
        pole,
        lengths: (
            positions[0].distance(positions[1]),
            positions[1].distance(positions[2]),
        ),
    })
}

/// Build a limb rig for the first three joints of the chain starting at `root`.
pub fn compile_limb(
    graph: &mut RigGraph,
    hierarchy: &JointHierarchy,
    root: JointId,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<LimbRig> {
    let root_name = hierarchy.get(root)?.name.clone();
    let chain = hierarchy.chain_from(root)?;
    if chain.len() < LIMB_JOINTS {
        return Err(StructuralError::InsufficientChainLength {
            root: root_name,
            found: chain.len(),
            required: LIMB_JOINTS,
        }
        .into());
    }
    let joints = &chain[..LIMB_JOINTS];
    let positions = hierarchy.positions(joints)?;
    let placement = place([positions[0], positions[1], positions[2]], config)
        .stage("placement", &root_name)?;

    commit(graph, |g| build(g, hierarchy, joints, &placement, library, config))
}

fn build(
    g: &mut RigGraph,
    hierarchy: &JointHierarchy,
    joints: &[JointId],
    at: &Placement,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<LimbRig> {
    let cfg = &config.limb;
    let attrs = &config.attributes;
    let p = cfg.prefix.as_str();
    log::info!("limb '{p}': building joint chains");

    let group = g.add_node(format!("{p}_grp"), NodeKind::Group, Mat4::IDENTITY);
    let ctl_grp = g.add_node(format!("{p}_ctl_grp"), NodeKind::Group, Mat4::IDENTITY);
    let jnt_grp = g.add_node(format!("{p}_jnt_grp"), NodeKind::Group, Mat4::IDENTITY);
    g.set_parent(ctl_grp, group)?;
    g.set_parent(jnt_grp, group)?;

    // Bind chain mirrors the caller's skeleton.
    let mut bind = Vec::with_capacity(LIMB_JOINTS);
    for (i, joint) in joints.iter().enumerate() {
        let name = hierarchy.get(*joint)?.name.clone();
        let node = g.add_node(name, NodeKind::Joint, at.frames[i]);
        if let Some(prev) = bind.last() {
            g.set_parent(node, *prev)?;
        }
        bind.push(node);
    }

    let mut duplicates = DuplicateMap::default();
    let mut chains: [Vec<NodeId>; 3] = Default::default();
    for (slot, tag) in ChainTag::ALL.into_iter().enumerate() {
        for (i, joint) in joints.iter().enumerate() {
            let source = &hierarchy.get(*joint)?.name;
            let name = duplicate_name(source, &cfg.bind_pattern, tag, |n| g.find(n).is_some());
            let node = g.add_node(name, NodeKind::Joint, at.frames[i]);
            // Stretch points are blended against each other, so they stay flat.
            let parent = match (tag, chains[slot].last()) {
                (ChainTag::Stretch, _) | (_, None) => jnt_grp,
                (_, Some(prev)) => *prev,
            };
            g.set_parent(node, parent)?;
            duplicates.insert(*joint, tag, node);
            chains[slot].push(node);
        }
    }
    let [fk, ik, stretch] = chains;

    log::info!("limb '{p}': creating controls");
    let (l1, l2) = at.lengths;
    let avg = (l1 + l2) * 0.5 * cfg.control_scale;
    let up = cfg.axes.up.unit();
    let host_world = Mat4::from_translation(at.positions[2] + up * cfg.host_offset * cfg.control_scale);
    let mut control = |role: ControlRole, world: Mat4, shape: &str, size: f32| {
        let name = format!("{p}_{}", role.label());
        let spec = ControlSpec {
            name: name.clone(),
            role,
            world,
            shape,
            size,
            color: None,
        };
        add_control(g, library, Some(ctl_grp), &spec).stage("controls", &name)
    };
    let controls = LimbControls {
        host: control(ControlRole::Host, host_world, &cfg.host_shape, avg * 0.2)?,
        fk: [
            control(ControlRole::Fk1, at.frames[0], &cfg.fk_shape, avg * 0.3)?,
            control(ControlRole::Fk2, at.frames[1], &cfg.fk_shape, avg * 0.3)?,
            control(ControlRole::Fk3, at.frames[2], &cfg.fk_shape, avg * 0.3)?,
        ],
        pole: control(ControlRole::Pole, Mat4::from_translation(at.pole), &cfg.pole_shape, avg * 0.1)?,
        root: control(ControlRole::Root, at.frames[0], &cfg.root_shape, avg * 0.25)?,
        ik: control(ControlRole::Ik, at.frames[2], &cfg.ik_shape, avg * 0.25)?,
    };

    let host = controls.host.ctl;
    let switch = g.add_attr(host, IK_FK_SWITCH, AttrSpec::range(attrs.ik_fk_switch, 0.0, 1.0))?;
    let max_stretch = g.add_attr(host, MAX_STRETCH, AttrSpec::at_least(attrs.max_stretch, 1.0))?;
    let max_squash = g.add_attr(host, MAX_SQUASH, AttrSpec::range(attrs.max_squash, 0.0, 1.0))?;

    // Edges are wired only once every node exists.
    fk_follow(g, &controls, &fk, config)?;
    ik_fk_switch(g, &controls, &bind, &fk, &ik, &switch)?;
    let ik_handle = ik_handle(g, &controls, &ik, p)?;
    let stretch_driver = wire_stretch(g, &controls, &ik, &stretch, at, max_stretch, max_squash, config)?;

    log::info!(
        "limb '{p}': done, {} nodes, {} edges",
        g.len(),
        g.edges().len()
    );
    Ok(LimbRig {
        group,
        bind,
        fk,
        ik,
        stretch,
        duplicates,
        controls,
        ik_handle,
        switch,
        stretch_driver,
    })
}

fn bind_to(g: &mut RigGraph, target: NodeId, source: NodeId, channel: Channel) -> CompileResult<()> {
    let plan = BindPlan::from_influences(0, &InfluenceSet::single(source))?;
    g.add_blend_edge(target, channel, plan.sources(), BlendMode::WeightedAverage)?;
    Ok(())
}

fn fk_follow(
    g: &mut RigGraph,
    controls: &LimbControls,
    chain: &[NodeId],
    config: &CompilerConfig,
) -> CompileResult<()> {
    log::info!("limb: FK follow");
    let attrs = &config.attributes;
    let mut leader = controls.root;
    for (i, fk) in controls.fk.iter().copied().enumerate() {
        let name = g.node(fk.srt)?.name.clone();
        let follow_t = g.add_attr(
            fk.ctl,
            FOLLOW_TRANSLATION,
            AttrSpec::range(attrs.follow_translation, 0.0, 1.0),
        )?;
        let follow_r = g.add_attr(
            fk.ctl,
            FOLLOW_ROTATION,
            AttrSpec::range(attrs.follow_rotation, 0.0, 1.0),
        )?;
        g.add_blend_edge(
            fk.srt,
            Channel::Translate,
            vec![BlendSource::new(leader.ctl, WeightExpr::Attr(follow_t))],
            BlendMode::AdditiveParent,
        )
        .stage("fk follow", &name)?;
        g.add_blend_edge(
            fk.srt,
            Channel::Rotate,
            vec![BlendSource::new(leader.ctl, WeightExpr::Attr(follow_r))],
            BlendMode::AdditiveParent,
        )
        .stage("fk follow", &name)?;
        bind_to(g, chain[i], fk.ctl, Channel::All).stage("fk bind", &name)?;
        leader = fk;
    }
    Ok(())
}

fn ik_fk_switch(
    g: &mut RigGraph,
    controls: &LimbControls,
    bind: &[NodeId],
    fk: &[NodeId],
    ik: &[NodeId],
    switch: &AttrRef,
) -> CompileResult<()> {
    log::info!("limb: IK/FK switch");
    let ik_weight = WeightExpr::Attr(switch.clone());
    for i in 0..LIMB_JOINTS {
        let name = g.node(bind[i])?.name.clone();
        g.add_blend_edge(
            bind[i],
            Channel::All,
            vec![
                BlendSource::new(fk[i], ik_weight.clone().reverse()),
                BlendSource::new(ik[i], ik_weight.clone()),
            ],
            BlendMode::PoleReverseSwitch,
        )
        .stage("ik/fk switch", &name)?;
    }
    bind_to(g, controls.host.srt, bind[LIMB_JOINTS - 1], Channel::Translate).stage("host follow", "host")?;
    Ok(())
}

fn ik_handle(
    g: &mut RigGraph,
    controls: &LimbControls,
    chain: &[NodeId],
    prefix: &str,
) -> CompileResult<NodeId> {
    log::info!("limb: IK handle");
    let (ik_ctl, pole, root) = (controls.ik, controls.pole, controls.root);
    let end = chain[LIMB_JOINTS - 1];
    let end_world = g.node(end)?.world;
    let name = format!("{prefix}_ikHandle");
    let handle = g.add_node(name.clone(), NodeKind::IkHandle, end_world);
    g.set_parent(handle, ik_ctl.ctl)?;
    g.set_visible(handle, false)?;
    g.add_ik_solve(IkSolve {
        name: format!("{prefix}_ikSolve"),
        handle,
        start: chain[0],
        end,
        goal: ik_ctl.ctl,
        pole: pole.ctl,
    })
    .stage("ik handle", &name)?;
    bind_to(g, chain[0], root.ctl, Channel::Translate).stage("ik root", &name)?;
    bind_to(g, end, ik_ctl.ctl, Channel::Rotate).stage("ik end rotation", &name)?;
    Ok(handle)
}

fn wire_stretch(
    g: &mut RigGraph,
    controls: &LimbControls,
    ik: &[NodeId],
    points: &[NodeId],
    at: &Placement,
    max_stretch: AttrRef,
    max_squash: AttrRef,
    config: &CompilerConfig,
) -> CompileResult<StretchDriver> {
    log::info!("limb: stretch");
    let (root, ik_ctl) = (controls.root, controls.ik);
    let [s0, s1, s2] = [points[0], points[1], points[2]];
    bind_to(g, s0, root.ctl, Channel::Translate).stage("stretch", "start")?;
    bind_to(g, s2, ik_ctl.ctl, Channel::Translate).stage("stretch", "end")?;
    let (l1, l2) = at.lengths;
    let t = l1 / (l1 + l2);
    let plan = BindPlan::from_influences(
        1,
        &InfluenceSet::new(vec![
            Influence {
                node: s0,
                weight: 1.0 - t,
            },
            Influence { node: s2, weight: t },
        ]),
    )?;
    g.add_blend_edge(s1, Channel::Translate, plan.sources(), BlendMode::WeightedAverage)
        .stage("stretch", "middle")?;

    // Same three points the driver measures live, so the ratio is 1 at bind.
    let mut rest = [Vec3::ZERO; LIMB_JOINTS];
    for (slot, node) in rest.iter_mut().zip([s0, s1, s2]) {
        *slot = g.node(node)?.position();
    }
    let driver = StretchDriver {
        reference_length: chain_length(&rest),
        points: [s0, s1, s2],
        max_stretch,
        max_squash,
    };
    let scale_attr = config.limb.axes.primary.scale_attr();
    g.add_driver(ScalarDriver {
        name: format!("{}_stretch", config.limb.prefix),
        expr: driver.to_expr(),
        outputs: vec![
            AttrRef::new(ik[0], scale_attr),
            AttrRef::new(ik[1], scale_attr),
        ],
    })
    .stage("stretch", "driver")?;
    Ok(driver)
}
