//! Transform blend graph: the compiled rig as a plain value.
//!
//! Nodes carry their bind-time world transform and a static parent. Everything that moves
//! a node at runtime is described by a [`BlendEdge`], a [`ScalarDriver`] or an [`IkSolve`].
//! The graph is kept acyclic on every insertion, so a topological order always exists.

pub mod expr;
pub mod topo;

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::binder::InfluenceSet;
use crate::error::GraphError;
use crate::geometry::BoundingBox;
use crate::ids::{IdAllocator, NodeId};

pub use expr::{
    AttrRef, Compare, QuatPart, ScalarContext, ScalarDriver, ScalarExpr, StretchDriver, WeightExpr,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Group,
    Joint,
    Null,
    Srt,
    Control,
    Locator,
    IkHandle,
    Lattice,
    Curve,
    Surface,
    Pin,
    Mesh,
}

/// Semantic role of a control within the rig it belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRole {
    Host,
    Fk1,
    Fk2,
    Fk3,
    Pole,
    Root,
    Ik,
    RibbonStart,
    RibbonStartTangent,
    RibbonMid,
    RibbonEndTangent,
    RibbonEnd,
    LatticeLower,
    LatticeMiddle,
    LatticeUpper,
    CageVertex(u32),
    Main,
    Local(u8),
    Eye,
}

impl ControlRole {
    /// FK role for a zero-based chain position.
    pub fn fk(index: usize) -> Option<ControlRole> {
        match index {
            0 => Some(ControlRole::Fk1),
            1 => Some(ControlRole::Fk2),
            2 => Some(ControlRole::Fk3),
            _ => None,
        }
    }

    pub fn label(self) -> String {
        match self {
            ControlRole::Host => "host".into(),
            ControlRole::Fk1 => "fk_1".into(),
            ControlRole::Fk2 => "fk_2".into(),
            ControlRole::Fk3 => "fk_3".into(),
            ControlRole::Pole => "pole".into(),
            ControlRole::Root => "root".into(),
            ControlRole::Ik => "ik".into(),
            ControlRole::RibbonStart => "start".into(),
            ControlRole::RibbonStartTangent => "start_tangent".into(),
            ControlRole::RibbonMid => "mid".into(),
            ControlRole::RibbonEndTangent => "end_tangent".into(),
            ControlRole::RibbonEnd => "end".into(),
            ControlRole::LatticeLower => "lower".into(),
            ControlRole::LatticeMiddle => "middle".into(),
            ControlRole::LatticeUpper => "upper".into(),
            ControlRole::CageVertex(i) => format!("vtx_{i}"),
            ControlRole::Main => "main".into(),
            ControlRole::Local(i) => format!("local_{i}"),
            ControlRole::Eye => "eye".into(),
        }
    }
}

/// Forward-only binding lifecycle of a node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindState {
    #[default]
    Unbound,
    Bound,
    Blended,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttrSpec {
    pub default: f32,
    #[serde(default)]
    pub min: Option<f32>,
    #[serde(default)]
    pub max: Option<f32>,
    #[serde(default = "default_true")]
    pub keyable: bool,
}

fn default_true() -> bool {
    true
}

impl AttrSpec {
    pub fn new(default: f32) -> Self {
        AttrSpec {
            default,
            min: None,
            max: None,
            keyable: true,
        }
    }

    pub fn range(default: f32, min: f32, max: f32) -> Self {
        AttrSpec {
            default,
            min: Some(min),
            max: Some(max),
            keyable: true,
        }
    }

    pub fn at_least(default: f32, min: f32) -> Self {
        AttrSpec {
            default,
            min: Some(min),
            max: None,
            keyable: true,
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        let v = self.min.map_or(value, |m| value.max(m));
        self.max.map_or(v, |m| v.min(m))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlShape {
    /// Key into the shape library.
    pub key: String,
    pub size: f32,
    #[serde(default)]
    pub color: Option<[f32; 3]>,
}

/// Transform channels a host may lock on a control.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lock {
    Translate,
    Rotate,
    Scale,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub role: Option<ControlRole>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// Offset from the parent's bind world, derived whenever the parent changes.
    pub local: Mat4,
    /// World transform captured at creation.
    pub world: Mat4,
    pub visible: bool,
    #[serde(default)]
    pub attributes: IndexMap<String, AttrSpec>,
    #[serde(default)]
    pub shape: Option<ControlShape>,
    #[serde(default)]
    pub locks: Vec<Lock>,
    #[serde(default)]
    pub state: BindState,
}

impl TransformNode {
    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    All,
    Translate,
    Rotate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Sources offset the target's static transform, partial weights fade to identity.
    AdditiveParent,
    /// Sources replace the target's transform, keeping the bind offset.
    WeightedAverage,
    /// Two-source switch whose weights are an attribute and its reverse.
    PoleReverseSwitch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendSource {
    pub node: NodeId,
    pub weight: WeightExpr,
}

impl BlendSource {
    pub fn new(node: NodeId, weight: WeightExpr) -> Self {
        BlendSource { node, weight }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendEdge {
    pub target: NodeId,
    pub channel: Channel,
    pub mode: BlendMode,
    pub sources: Vec<BlendSource>,
}

/// Two-bone IK solve, evaluated by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IkSolve {
    pub name: String,
    pub handle: NodeId,
    pub start: NodeId,
    pub end: NodeId,
    pub goal: NodeId,
    pub pole: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkinBinding {
    pub name: String,
    pub deformer: NodeId,
    pub influences: Vec<NodeId>,
    /// One entry per deformed point.
    pub points: Vec<InfluenceSet>,
    /// Parallel to `influences` when present.
    #[serde(default)]
    pub bind_pre: Vec<NodeId>,
}

/// Curve control vertex: `offset` expressed in the driver's space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveCv {
    pub driver: NodeId,
    pub offset: Vec3,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveSpec {
    pub node: NodeId,
    pub degree: u8,
    pub cvs: Vec<CurveCv>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoftSpec {
    pub surface: NodeId,
    pub curves: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeSpec {
    pub node: NodeId,
    pub divisions: [u32; 3],
    pub bounds: BoundingBox,
}

/// Pin riding on a surface at its `parameterU`/`parameterV` attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinAttachment {
    pub pin: NodeId,
    pub surface: NodeId,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RigGraph {
    ids: IdAllocator,
    nodes: Vec<TransformNode>,
    edges: Vec<BlendEdge>,
    drivers: Vec<ScalarDriver>,
    ik_solves: Vec<IkSolve>,
    skins: Vec<SkinBinding>,
    curves: Vec<CurveSpec>,
    lofts: Vec<LoftSpec>,
    lattices: Vec<LatticeSpec>,
    pins: Vec<PinAttachment>,
    #[serde(skip)]
    names: HashMap<String, NodeId>,
    #[serde(skip)]
    incoming: topo::Incoming,
}

impl RigGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the name and dependency indices after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.names = self
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.id))
            .collect();
        self.incoming = topo::Incoming::rebuild(self);
    }

    /// Solvers and skins become host nodes too, so they share the node namespace.
    fn taken(&self, name: &str) -> bool {
        self.find(name).is_some()
            || self.ik_solves.iter().any(|s| s.name == name)
            || self.skins.iter().any(|s| s.name == name)
    }

    /// `base` if it is free, otherwise `base_N` with the smallest free `N >= 2`.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.taken(base) {
            return base.to_string();
        }
        (2u32..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.taken(candidate))
            .unwrap_or_default()
    }

    /// Add a node. Names stay unique: a taken name gets a numeric suffix, so read the
    /// final name back from the node when it matters.
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind, world: Mat4) -> NodeId {
        let id = self.ids.alloc_node();
        let requested = name.into();
        let name = self.unique_name(&requested);
        if name != requested {
            log::debug!("'{requested}' is taken, renamed to '{name}'");
        }
        log::debug!("add {kind:?} '{name}' as {id}");
        self.names.insert(name.clone(), id);
        self.nodes.push(TransformNode {
            id,
            name,
            kind,
            role: None,
            parent: None,
            local: world,
            world,
            visible: true,
            attributes: IndexMap::new(),
            shape: None,
            locks: Vec::new(),
            state: BindState::Unbound,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&TransformNode, GraphError> {
        self.nodes.get(id.index()).ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut TransformNode, GraphError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn nodes(&self) -> &[TransformNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[BlendEdge] {
        &self.edges
    }

    pub fn drivers(&self) -> &[ScalarDriver] {
        &self.drivers
    }

    pub fn ik_solves(&self) -> &[IkSolve] {
        &self.ik_solves
    }

    pub fn skins(&self) -> &[SkinBinding] {
        &self.skins
    }

    pub fn curves(&self) -> &[CurveSpec] {
        &self.curves
    }

    pub fn lofts(&self) -> &[LoftSpec] {
        &self.lofts
    }

    pub fn lattices(&self) -> &[LatticeSpec] {
        &self.lattices
    }

    pub fn pins(&self) -> &[PinAttachment] {
        &self.pins
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = &TransformNode> {
        self.nodes.iter().filter(move |n| n.parent == Some(parent))
    }

    pub fn edges_for(&self, target: NodeId) -> impl Iterator<Item = &BlendEdge> {
        self.edges.iter().filter(move |e| e.target == target)
    }

    pub fn role(&self, role: ControlRole) -> Option<&TransformNode> {
        self.nodes
            .iter()
            .find(|n| n.role == Some(role) && n.kind == NodeKind::Control)
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    /// Static parent. The child's world is kept, its local offset recomputed.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), GraphError> {
        self.check(child)?;
        self.check(parent)?;
        if child == parent || topo::depends_on(self, parent, child, None) {
            return Err(GraphError::Cycle {
                target: child,
                driver: parent,
            });
        }
        let parent_world = self.nodes[parent.index()].world;
        let node = &mut self.nodes[child.index()];
        node.parent = Some(parent);
        node.local = parent_world.inverse() * node.world;
        Ok(())
    }

    pub fn set_role(&mut self, id: NodeId, role: ControlRole) -> Result<(), GraphError> {
        self.node_mut(id)?.role = Some(role);
        Ok(())
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> Result<(), GraphError> {
        self.node_mut(id)?.visible = visible;
        Ok(())
    }

    pub fn set_shape(&mut self, id: NodeId, shape: ControlShape) -> Result<(), GraphError> {
        self.node_mut(id)?.shape = Some(shape);
        Ok(())
    }

    pub fn lock(&mut self, id: NodeId, locks: &[Lock]) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        for l in locks {
            if !node.locks.contains(l) {
                node.locks.push(*l);
            }
        }
        Ok(())
    }

    /// Declare (or redeclare) a keyable attribute, returning a reference to it.
    pub fn add_attr(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        spec: AttrSpec,
    ) -> Result<AttrRef, GraphError> {
        let name = name.into();
        self.node_mut(id)?.attributes.insert(name.clone(), spec);
        Ok(AttrRef::new(id, name))
    }

    pub fn attr(&self, attr: &AttrRef) -> Result<&AttrSpec, GraphError> {
        self.node(attr.node)?
            .attributes
            .get(&attr.attr)
            .ok_or_else(|| GraphError::UnknownAttribute {
                node: attr.node,
                attr: attr.attr.clone(),
            })
    }

    fn check_weight(&self, weight: &WeightExpr) -> Result<(), GraphError> {
        for r in weight.attr_refs() {
            self.attr(r)?;
        }
        Ok(())
    }

    fn advance(&mut self, id: NodeId, state: BindState) {
        let node = &mut self.nodes[id.index()];
        if node.state < state {
            node.state = state;
        }
    }

    /// Register a weighted blend. A previous edge with the same `(target, channel)` is
    /// replaced in place.
    pub fn add_blend_edge(
        &mut self,
        target: NodeId,
        channel: Channel,
        sources: Vec<BlendSource>,
        mode: BlendMode,
    ) -> Result<(), GraphError> {
        if sources.is_empty() {
            return Err(GraphError::EmptySources(target));
        }
        self.check(target)?;
        for s in &sources {
            self.check(s.node)?;
            self.check_weight(&s.weight)?;
        }
        let replaced = self
            .edges
            .iter()
            .position(|e| e.target == target && e.channel == channel);
        for s in &sources {
            if s.node == target || topo::depends_on(self, s.node, target, replaced) {
                return Err(GraphError::Cycle {
                    target,
                    driver: s.node,
                });
            }
        }

        let edge = BlendEdge {
            target,
            channel,
            mode,
            sources,
        };
        log::debug!(
            "{:?} blend into {target} ({channel:?}) from {} source(s)",
            mode,
            edge.sources.len()
        );
        match replaced {
            Some(i) => self.edges[i] = edge,
            None => {
                self.incoming.edge(target, self.edges.len());
                self.edges.push(edge);
            }
        }
        let state = if self.edges_for(target).any(|e| e.sources.len() > 1) {
            BindState::Blended
        } else {
            BindState::Bound
        };
        self.advance(target, state);
        Ok(())
    }

    pub fn add_driver(&mut self, driver: ScalarDriver) -> Result<(), GraphError> {
        let mut inputs = Vec::new();
        driver.expr.transform_inputs(&mut inputs);
        for n in &inputs {
            self.check(*n)?;
        }
        for out in &driver.outputs {
            self.check(out.node)?;
            for n in &inputs {
                if *n == out.node || topo::depends_on(self, *n, out.node, None) {
                    return Err(GraphError::Cycle {
                        target: out.node,
                        driver: *n,
                    });
                }
            }
        }
        log::debug!("driver '{}' -> {} output(s)", driver.name, driver.outputs.len());
        for out in &driver.outputs {
            self.advance(out.node, BindState::Bound);
        }
        self.incoming.driver(&driver, self.drivers.len());
        self.drivers.push(driver);
        Ok(())
    }

    pub fn add_ik_solve(&mut self, mut solve: IkSolve) -> Result<(), GraphError> {
        for n in [solve.handle, solve.start, solve.end, solve.goal, solve.pole] {
            self.check(n)?;
        }
        for driver in [solve.goal, solve.pole] {
            if driver == solve.start || topo::depends_on(self, driver, solve.start, None) {
                return Err(GraphError::Cycle {
                    target: solve.start,
                    driver,
                });
            }
        }
        solve.name = self.unique_name(&solve.name);
        self.advance(solve.start, BindState::Bound);
        self.incoming.solve(&solve, self.ik_solves.len());
        self.ik_solves.push(solve);
        Ok(())
    }

    pub fn add_skin(&mut self, mut skin: SkinBinding) -> Result<(), GraphError> {
        self.check(skin.deformer)?;
        for n in skin.influences.iter().chain(skin.bind_pre.iter()) {
            self.check(*n)?;
        }
        skin.name = self.unique_name(&skin.name);
        self.skins.push(skin);
        Ok(())
    }

    pub fn add_curve(&mut self, curve: CurveSpec) -> Result<(), GraphError> {
        self.check(curve.node)?;
        for cv in &curve.cvs {
            self.check(cv.driver)?;
        }
        self.curves.push(curve);
        Ok(())
    }

    pub fn add_loft(&mut self, loft: LoftSpec) -> Result<(), GraphError> {
        self.check(loft.surface)?;
        for c in &loft.curves {
            self.check(*c)?;
        }
        self.lofts.push(loft);
        Ok(())
    }

    pub fn add_lattice(&mut self, lattice: LatticeSpec) -> Result<(), GraphError> {
        self.check(lattice.node)?;
        self.lattices.push(lattice);
        Ok(())
    }

    pub fn add_pin(&mut self, pin: PinAttachment) -> Result<(), GraphError> {
        self.check(pin.pin)?;
        self.check(pin.surface)?;
        self.pins.push(pin);
        Ok(())
    }

    /// Dependency-respecting node order, ties broken by insertion order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        topo::topo_order(self)
    }
}
