//! Host adapter seam.
//!
//! A scene engine implements [`SceneHost`] and receives a compiled [`RigGraph`] through
//! [`materialize`]. Nodes are addressed by their graph names. Helper nodes created for
//! blends and drivers are named after the node they feed.
//!
//! Order of operations: transform nodes in topological order, blend helpers, IK solvers,
//! scalar drivers, then deformers (skins, curves, lofts, lattices, pins).
//!
//! Hosts compose a transform as `parentWorld · offsetParentMatrix · local`.

use glam::Mat4;
use hashbrown::HashSet;
use thiserror::Error;

use crate::compile::surface::{PARAMETER_U, PARAMETER_V};
use crate::error::{GraphError, ResourceError};
use crate::graph::{
    AttrSpec, BlendEdge, BlendMode, Channel, Compare, Lock, NodeKind, QuatPart, RigGraph,
    ScalarExpr, WeightExpr,
};
use crate::ids::NodeId;
use crate::shapes::{ShapeCurve, ShapeLibrary};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("host has no node named '{0}'")]
    UnknownNode(String),
    #[error("host already has a node named '{0}'")]
    DuplicateNode(String),
    #[error("host rejected {op} on '{target}': {reason}")]
    Rejected {
        op: &'static str,
        target: String,
        reason: String,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

pub type HostResult<T> = Result<T, HostError>;

/// Node types a host must be able to create.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostNodeKind {
    Transform(NodeKind),
    /// Two-input matrix lerp.
    BlendMatrix,
    /// Weighted matrix sum with per-input weights.
    WeightedMatrixSum,
    /// Product `matrixIn[0] · matrixIn[1] · …`, output `matrixSum`.
    MultMatrix,
    /// Split a matrix into translate/rotate/scale outputs.
    DecomposeMatrix,
    /// `1 - input`.
    Reverse,
    Arithmetic(ArithmeticOp),
    Condition(Compare),
    /// Two-key linear ramp lookup between an output min and max.
    RemapValue,
    /// Euler rotation in degrees to quaternion components.
    EulerToQuat,
    Distance,
    IkSolver,
    SkinCluster,
    /// Point at `offset` in the space of an input matrix.
    PointOnMatrix,
    Loft,
    SurfacePin,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// `node.attr` address on the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Plug {
    pub node: String,
    pub attr: String,
}

impl Plug {
    pub fn new(node: impl Into<String>, attr: impl Into<String>) -> Self {
        Plug {
            node: node.into(),
            attr: attr.into(),
        }
    }
}

/// Scene engine operations the materializer relies on.
pub trait SceneHost {
    fn create_node(&mut self, kind: HostNodeKind, name: &str) -> HostResult<()>;
    fn set_parent(&mut self, child: &str, parent: &str) -> HostResult<()>;
    /// Create an empty group named `name` and move `children` under it.
    fn group(&mut self, children: &[&str], name: &str) -> HostResult<()>;
    fn add_attr(&mut self, node: &str, attr: &str, spec: &AttrSpec) -> HostResult<()>;
    fn set_attr(&mut self, plug: &Plug, value: f32) -> HostResult<()>;
    fn set_matrix(&mut self, node: &str, world: &Mat4) -> HostResult<()>;
    /// Set a constant matrix input on a helper.
    fn set_matrix_attr(&mut self, plug: &Plug, value: &Mat4) -> HostResult<()>;
    /// Connect `source` into `dest`. With `force`, an existing input on `dest` is replaced.
    fn connect(&mut self, source: &Plug, dest: &Plug, force: bool) -> HostResult<()>;
    fn set_shape(&mut self, node: &str, curves: &[ShapeCurve], color: Option<[f32; 3]>) -> HostResult<()>;
    fn lock(&mut self, node: &str, channel: Lock) -> HostResult<()>;
}

/// Either a literal or a live plug feeding a helper input.
#[derive(Clone)]
enum Operand {
    Value(f32),
    Plug(Plug),
}

fn feed(host: &mut dyn SceneHost, operand: &Operand, dest: &Plug) -> HostResult<()> {
    match operand {
        Operand::Value(v) => host.set_attr(dest, *v),
        Operand::Plug(p) => host.connect(p, dest, true),
    }
}

#[derive(Clone)]
enum MatrixInput {
    Value(Mat4),
    Plug(Plug),
}

fn name(graph: &RigGraph, id: NodeId) -> HostResult<&str> {
    Ok(graph.node(id)?.name.as_str())
}

fn world(graph: &RigGraph, id: NodeId) -> HostResult<Plug> {
    Ok(Plug::new(name(graph, id)?, "worldMatrix"))
}

struct Materializer<'a> {
    graph: &'a RigGraph,
    host: &'a mut dyn SceneHost,
    helpers: usize,
}

impl Materializer<'_> {
    fn helper(&mut self, kind: HostNodeKind, base: &str, suffix: &str) -> HostResult<String> {
        self.helpers += 1;
        let name = format!("{base}_{suffix}{}", self.helpers);
        self.host.create_node(kind, &name)?;
        Ok(name)
    }

    fn nodes(&mut self, library: &ShapeLibrary) -> HostResult<()> {
        let graph = self.graph;
        for id in graph.topological_order()? {
            let node = graph.node(id)?;
            let node_name = node.name.as_str();
            if node.kind == NodeKind::Group {
                self.host.group(&[], node_name)?;
            } else {
                self.host.create_node(HostNodeKind::Transform(node.kind), node_name)?;
            }
            if let Some(parent) = node.parent {
                self.host.set_parent(node_name, &graph.node(parent)?.name)?;
            }
            self.host.set_matrix(node_name, &node.world)?;
            for (attr, spec) in &node.attributes {
                self.host.add_attr(node_name, attr, spec)?;
            }
            if let Some(shape) = &node.shape {
                let curves = library.scaled(&shape.key, shape.size)?;
                self.host.set_shape(node_name, &curves, shape.color)?;
            }
            for lock in &node.locks {
                self.host.lock(node_name, *lock)?;
            }
            if !node.visible {
                self.host.set_attr(&Plug::new(node_name, "visibility"), 0.0)?;
            }
        }
        Ok(())
    }

    fn weight(&mut self, expr: &WeightExpr, base: &str) -> HostResult<Operand> {
        let graph = self.graph;
        Ok(match expr {
            WeightExpr::Constant(v) => Operand::Value(*v),
            WeightExpr::Attr(r) => Operand::Plug(Plug::new(name(graph, r.node)?, r.attr.as_str())),
            WeightExpr::Reverse(inner) => {
                let input = self.weight(inner, base)?;
                let rev = self.helper(HostNodeKind::Reverse, base, "rev")?;
                feed(self.host, &input, &Plug::new(rev.as_str(), "input"))?;
                Operand::Plug(Plug::new(rev, "output"))
            }
        })
    }

    fn matrix_input(&mut self, input: &MatrixInput, dest: &Plug) -> HostResult<()> {
        match input {
            MatrixInput::Value(m) => self.host.set_matrix_attr(dest, m),
            MatrixInput::Plug(p) => self.host.connect(p, dest, true),
        }
    }

    fn product(&mut self, inputs: &[MatrixInput], base: &str, suffix: &str) -> HostResult<Plug> {
        let node = self.helper(HostNodeKind::MultMatrix, base, suffix)?;
        for (i, input) in inputs.iter().enumerate() {
            self.matrix_input(input, &Plug::new(node.as_str(), format!("matrixIn[{i}]")))?;
        }
        Ok(Plug::new(node, "matrixSum"))
    }

    /// Source motion since bind: `worldMatrix · bind⁻¹`.
    fn delta(&mut self, source: NodeId, base: &str) -> HostResult<Plug> {
        let graph = self.graph;
        let bind = graph.node(source)?.world;
        let inputs = [
            MatrixInput::Plug(world(graph, source)?),
            MatrixInput::Value(bind.inverse()),
        ];
        self.product(&inputs, base, "delta")
    }

    fn weighted_sum(&mut self, terms: &[(MatrixInput, Operand)], base: &str) -> HostResult<Plug> {
        let node = self.helper(HostNodeKind::WeightedMatrixSum, base, "wtAdd")?;
        for (i, (matrix, weight)) in terms.iter().enumerate() {
            self.matrix_input(matrix, &Plug::new(node.as_str(), format!("matrixIn[{i}]")))?;
            feed(self.host, weight, &Plug::new(node.as_str(), format!("weightIn[{i}]")))?;
        }
        Ok(Plug::new(node, "matrixSum"))
    }

    /// `1 - Σ weights`, folded to a literal when every weight is one.
    fn remainder(&mut self, weights: &[Operand], base: &str) -> HostResult<Operand> {
        let mut constant = 0.0;
        let mut live: Option<Operand> = None;
        for w in weights {
            match w {
                Operand::Value(v) => constant += v,
                Operand::Plug(_) => {
                    live = Some(match live {
                        None => w.clone(),
                        Some(sum) => self.combine(ArithmeticOp::Add, &sum, w, base)?,
                    });
                }
            }
        }
        let Some(mut sum) = live else {
            return Ok(Operand::Value(1.0 - constant));
        };
        if constant != 0.0 {
            sum = self.combine(ArithmeticOp::Add, &sum, &Operand::Value(constant), base)?;
        }
        let rev = self.helper(HostNodeKind::Reverse, base, "rev")?;
        feed(self.host, &sum, &Plug::new(rev.as_str(), "input"))?;
        Ok(Operand::Plug(Plug::new(rev, "output")))
    }

    /// Lower an edge the way [`crate::eval`] evaluates it. Sources contribute their motion
    /// since bind. AdditiveParent adds `(1 - Σw)·I` and offsets the target's own
    /// transform; the other modes offset the target's bind world. The result is brought
    /// into parent space, then drives `offsetParentMatrix` or is split into
    /// translate/rotate.
    fn blend(&mut self, edge: &BlendEdge) -> HostResult<()> {
        let graph = self.graph;
        let node = graph.node(edge.target)?;
        let target = node.name.clone();
        let (bind_world, bind_local) = (node.world, node.local);
        let parent = match node.parent {
            Some(p) => Some(name(graph, p)?.to_string()),
            None => None,
        };

        let mut terms = Vec::with_capacity(edge.sources.len() + 1);
        for source in &edge.sources {
            let delta = self.delta(source.node, &target)?;
            let weight = self.weight(&source.weight, &target)?;
            terms.push((MatrixInput::Plug(delta), weight));
        }

        let offset = match edge.mode {
            BlendMode::AdditiveParent => {
                let weights: Vec<Operand> = terms.iter().map(|(_, w)| w.clone()).collect();
                let rest = self.remainder(&weights, &target)?;
                terms.push((MatrixInput::Value(Mat4::IDENTITY), rest));
                MatrixInput::Plug(self.weighted_sum(&terms, &target)?)
            }
            BlendMode::WeightedAverage if terms.len() == 1 => terms[0].0.clone(),
            BlendMode::WeightedAverage if terms.len() == 2 => {
                let helper = self.helper(HostNodeKind::BlendMatrix, &target, "blend")?;
                let ((a, _), (b, t)) = (&terms[0], &terms[1]);
                self.matrix_input(a, &Plug::new(helper.as_str(), "inputMatrix"))?;
                self.matrix_input(b, &Plug::new(helper.as_str(), "targetMatrix"))?;
                feed(self.host, t, &Plug::new(helper.as_str(), "weight"))?;
                MatrixInput::Plug(Plug::new(helper, "outputMatrix"))
            }
            _ => MatrixInput::Plug(self.weighted_sum(&terms, &target)?),
        };

        let mut inputs = Vec::with_capacity(4);
        if let Some(p) = &parent {
            inputs.push(MatrixInput::Plug(Plug::new(p.as_str(), "worldInverseMatrix")));
        }
        inputs.push(offset);
        match (edge.mode, edge.channel) {
            (BlendMode::AdditiveParent, channel) => {
                if let Some(p) = &parent {
                    inputs.push(MatrixInput::Plug(Plug::new(p.as_str(), "worldMatrix")));
                }
                // the target's own local stays in place under an offset parent matrix
                if channel != Channel::All {
                    inputs.push(MatrixInput::Value(bind_local));
                }
            }
            (_, Channel::All) => inputs.push(MatrixInput::Value(bind_world * bind_local.inverse())),
            _ => inputs.push(MatrixInput::Value(bind_world)),
        }
        let local = self.product(&inputs, &target, "local")?;

        if edge.channel == Channel::All {
            return self
                .host
                .connect(&local, &Plug::new(target.as_str(), "offsetParentMatrix"), true);
        }
        let decompose = self.helper(HostNodeKind::DecomposeMatrix, &target, "dcm")?;
        self.host
            .connect(&local, &Plug::new(decompose.as_str(), "inputMatrix"), true)?;
        let (out_attr, dest_attr) = match edge.channel {
            Channel::Rotate => ("outputRotate", "rotate"),
            _ => ("outputTranslate", "translate"),
        };
        self.host.connect(
            &Plug::new(decompose, out_attr),
            &Plug::new(target.as_str(), dest_attr),
            true,
        )
    }

    fn combine(&mut self, op: ArithmeticOp, a: &Operand, b: &Operand, base: &str) -> HostResult<Operand> {
        let node = self.helper(HostNodeKind::Arithmetic(op), base, "math")?;
        feed(self.host, a, &Plug::new(node.as_str(), "input1"))?;
        feed(self.host, b, &Plug::new(node.as_str(), "input2"))?;
        Ok(Operand::Plug(Plug::new(node, "output")))
    }

    fn binary(&mut self, op: ArithmeticOp, lhs: &ScalarExpr, rhs: &ScalarExpr, base: &str) -> HostResult<Operand> {
        let a = self.scalar(lhs, base)?;
        let b = self.scalar(rhs, base)?;
        self.combine(op, &a, &b, base)
    }

    fn distance(&mut self, a: NodeId, b: NodeId, base: &str) -> HostResult<Operand> {
        let graph = self.graph;
        let node = self.helper(HostNodeKind::Distance, base, "dist")?;
        self.host
            .connect(&world(graph, a)?, &Plug::new(node.as_str(), "inMatrix1"), true)?;
        self.host
            .connect(&world(graph, b)?, &Plug::new(node.as_str(), "inMatrix2"), true)?;
        Ok(Operand::Plug(Plug::new(node, "distance")))
    }

    fn scalar(&mut self, expr: &ScalarExpr, base: &str) -> HostResult<Operand> {
        let graph = self.graph;
        match expr {
            ScalarExpr::Constant { value } => Ok(Operand::Value(*value)),
            ScalarExpr::Attr { attr } => Ok(Operand::Plug(Plug::new(
                name(graph, attr.node)?,
                attr.attr.as_str(),
            ))),
            ScalarExpr::Distance { a, b } => self.distance(*a, *b, base),
            ScalarExpr::ChainLength { nodes } => {
                let mut total = Operand::Value(0.0);
                for pair in nodes.windows(2) {
                    let segment = self.distance(pair[0], pair[1], base)?;
                    total = match total {
                        Operand::Value(v) if v == 0.0 => segment,
                        prev => self.combine(ArithmeticOp::Add, &prev, &segment, base)?,
                    };
                }
                Ok(total)
            }
            ScalarExpr::Add { lhs, rhs } => self.binary(ArithmeticOp::Add, lhs, rhs, base),
            ScalarExpr::Sub { lhs, rhs } => self.binary(ArithmeticOp::Sub, lhs, rhs, base),
            ScalarExpr::Mul { lhs, rhs } => self.binary(ArithmeticOp::Mul, lhs, rhs, base),
            ScalarExpr::Div { lhs, rhs } => self.binary(ArithmeticOp::Div, lhs, rhs, base),
            ScalarExpr::Min { lhs, rhs } => self.binary(ArithmeticOp::Min, lhs, rhs, base),
            ScalarExpr::Max { lhs, rhs } => self.binary(ArithmeticOp::Max, lhs, rhs, base),
            ScalarExpr::Reverse { input } => {
                let inner = self.scalar(input, base)?;
                let node = self.helper(HostNodeKind::Reverse, base, "rev")?;
                feed(self.host, &inner, &Plug::new(node.as_str(), "input"))?;
                Ok(Operand::Plug(Plug::new(node, "output")))
            }
            ScalarExpr::Remap { input, ramp, output } => {
                let value = self.scalar(input, base)?;
                let node = self.helper(HostNodeKind::RemapValue, base, "remap")?;
                feed(self.host, &value, &Plug::new(node.as_str(), "inputValue"))?;
                let settings = [
                    ("inputMin", 0.0),
                    ("inputMax", 1.0),
                    ("outputMin", output[0]),
                    ("outputMax", output[1]),
                    ("value[0].value_Position", 0.0),
                    ("value[0].value_FloatValue", ramp[0]),
                    ("value[0].value_Interp", 1.0),
                    ("value[1].value_Position", 1.0),
                    ("value[1].value_FloatValue", ramp[1]),
                    ("value[1].value_Interp", 1.0),
                ];
                for (attr, v) in settings {
                    self.host.set_attr(&Plug::new(node.as_str(), attr), v)?;
                }
                Ok(Operand::Plug(Plug::new(node, "outValue")))
            }
            ScalarExpr::RotateXQuat { degrees, part } => {
                let angle = self.scalar(degrees, base)?;
                let node = self.helper(HostNodeKind::EulerToQuat, base, "quat")?;
                feed(self.host, &angle, &Plug::new(node.as_str(), "inputRotateX"))?;
                let out = match part {
                    QuatPart::X => "outputQuatX",
                    QuatPart::W => "outputQuatW",
                };
                Ok(Operand::Plug(Plug::new(node, out)))
            }
            ScalarExpr::Condition {
                op,
                lhs,
                rhs,
                if_true,
                if_false,
            } => {
                let inputs = [
                    (self.scalar(lhs, base)?, "firstTerm"),
                    (self.scalar(rhs, base)?, "secondTerm"),
                    (self.scalar(if_true, base)?, "colorIfTrue"),
                    (self.scalar(if_false, base)?, "colorIfFalse"),
                ];
                let node = self.helper(HostNodeKind::Condition(*op), base, "cond")?;
                for (operand, attr) in &inputs {
                    feed(self.host, operand, &Plug::new(node.as_str(), *attr))?;
                }
                Ok(Operand::Plug(Plug::new(node, "outColor")))
            }
        }
    }

    fn solvers(&mut self) -> HostResult<()> {
        let graph = self.graph;
        for solve in graph.ik_solves() {
            self.host.create_node(HostNodeKind::IkSolver, &solve.name)?;
            let solver = solve.name.as_str();
            let links = [
                (solve.start, "message", "startJoint"),
                (solve.end, "message", "endEffector"),
                (solve.handle, "message", "handle"),
                (solve.goal, "worldMatrix", "goalMatrix"),
                (solve.pole, "worldMatrix", "poleMatrix"),
            ];
            for (node, out, input) in links {
                self.host
                    .connect(&Plug::new(name(graph, node)?, out), &Plug::new(solver, input), true)?;
            }
        }
        Ok(())
    }

    fn drivers(&mut self) -> HostResult<()> {
        let graph = self.graph;
        for driver in graph.drivers() {
            let value = self.scalar(&driver.expr, &driver.name)?;
            for out in &driver.outputs {
                let dest = Plug::new(name(graph, out.node)?, out.attr.as_str());
                feed(self.host, &value, &dest)?;
            }
        }
        Ok(())
    }

    fn deformers(&mut self) -> HostResult<()> {
        let graph = self.graph;
        for skin in graph.skins() {
            self.host.create_node(HostNodeKind::SkinCluster, &skin.name)?;
            let cluster = skin.name.as_str();
            for (i, influence) in skin.influences.iter().enumerate() {
                self.host.connect(
                    &world(graph, *influence)?,
                    &Plug::new(cluster, format!("matrix[{i}]")),
                    true,
                )?;
                if let Some(bpm) = skin.bind_pre.get(i) {
                    self.host.connect(
                        &Plug::new(name(graph, *bpm)?, "worldInverseMatrix"),
                        &Plug::new(cluster, format!("bindPreMatrix[{i}]")),
                        true,
                    )?;
                }
            }
            for (p, set) in skin.points.iter().enumerate() {
                for inf in &set.influences {
                    let Some(j) = skin.influences.iter().position(|n| *n == inf.node) else {
                        return Err(HostError::Rejected {
                            op: "skin weight",
                            target: skin.name.clone(),
                            reason: format!("{} is not an influence", inf.node),
                        });
                    };
                    self.host.set_attr(
                        &Plug::new(cluster, format!("weightList[{p}].weights[{j}]")),
                        inf.weight,
                    )?;
                }
            }
            self.host.connect(
                &Plug::new(cluster, "outputGeometry"),
                &Plug::new(name(graph, skin.deformer)?, "inputGeometry"),
                true,
            )?;
        }

        for curve in graph.curves() {
            let curve_name = name(graph, curve.node)?.to_string();
            self.host
                .set_attr(&Plug::new(curve_name.as_str(), "degree"), f32::from(curve.degree))?;
            for (i, cv) in curve.cvs.iter().enumerate() {
                let point = self.helper(HostNodeKind::PointOnMatrix, &curve_name, "cv")?;
                self.host
                    .connect(&world(graph, cv.driver)?, &Plug::new(point.as_str(), "inputMatrix"), true)?;
                for (axis, v) in ["offsetX", "offsetY", "offsetZ"].iter().zip(cv.offset.to_array()) {
                    self.host.set_attr(&Plug::new(point.as_str(), *axis), v)?;
                }
                self.host.connect(
                    &Plug::new(point, "output"),
                    &Plug::new(curve_name.as_str(), format!("controlPoints[{i}]")),
                    true,
                )?;
            }
        }

        for loft in graph.lofts() {
            let surface = name(graph, loft.surface)?.to_string();
            let node = self.helper(HostNodeKind::Loft, &surface, "loft")?;
            for (i, curve) in loft.curves.iter().enumerate() {
                self.host.connect(
                    &Plug::new(name(graph, *curve)?, "worldSpace"),
                    &Plug::new(node.as_str(), format!("inputCurve[{i}]")),
                    true,
                )?;
            }
            self.host
                .connect(&Plug::new(node, "outputSurface"), &Plug::new(surface, "create"), true)?;
        }

        for lattice in graph.lattices() {
            let lattice_name = name(graph, lattice.node)?;
            for (attr, d) in ["sDivisions", "tDivisions", "uDivisions"]
                .iter()
                .zip(lattice.divisions)
            {
                self.host.set_attr(&Plug::new(lattice_name, *attr), d as f32)?;
            }
        }

        for pin in graph.pins() {
            let surface = name(graph, pin.surface)?;
            let pin_name = name(graph, pin.pin)?.to_string();
            let node = self.helper(HostNodeKind::SurfacePin, &pin_name, "uvPin")?;
            self.host
                .connect(&Plug::new(surface, "worldSpace"), &Plug::new(node.as_str(), "deformedGeometry"), true)?;
            for (attr, coord) in [(PARAMETER_U, "coordinateU"), (PARAMETER_V, "coordinateV")] {
                self.host.connect(
                    &Plug::new(pin_name.as_str(), attr),
                    &Plug::new(node.as_str(), coord),
                    true,
                )?;
            }
            self.host.connect(
                &Plug::new(node, "outputMatrix"),
                &Plug::new(pin_name, "offsetParentMatrix"),
                true,
            )?;
        }
        Ok(())
    }
}

/// Recreate `graph` on `host`.
pub fn materialize(graph: &RigGraph, library: &ShapeLibrary, host: &mut dyn SceneHost) -> HostResult<()> {
    let mut m = Materializer {
        graph,
        host,
        helpers: 0,
    };
    log::info!("materialize: {} nodes", graph.len());
    m.nodes(library)?;
    log::info!("materialize: {} blend edges", graph.edges().len());
    for edge in graph.edges() {
        m.blend(edge)?;
    }
    m.solvers()?;
    log::info!("materialize: {} drivers", graph.drivers().len());
    m.drivers()?;
    m.deformers()?;
    log::info!("materialize: {} helper nodes", m.helpers);
    Ok(())
}

/// One recorded [`SceneHost`] call.
#[derive(Clone, Debug, PartialEq)]
pub enum HostOp {
    Create { kind: HostNodeKind, name: String },
    Parent { child: String, parent: String },
    Group { name: String, children: Vec<String> },
    AddAttr { node: String, attr: String, default: f32 },
    SetAttr { plug: Plug, value: f32 },
    SetMatrix { node: String },
    SetMatrixAttr { plug: Plug, value: Mat4 },
    Connect { source: Plug, dest: Plug, force: bool },
    Shape { node: String, curves: usize },
    Lock { node: String, channel: Lock },
}

/// In-memory host that records every call and validates node names.
#[derive(Clone, Debug, Default)]
pub struct RecordingHost {
    pub ops: Vec<HostOp>,
    nodes: HashSet<String>,
    connected: HashSet<Plug>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Index of the first op matching `pred`.
    pub fn position(&self, pred: impl Fn(&HostOp) -> bool) -> Option<usize> {
        self.ops.iter().position(pred)
    }

    pub fn connections(&self) -> impl Iterator<Item = (&Plug, &Plug)> {
        self.ops.iter().filter_map(|op| match op {
            HostOp::Connect { source, dest, .. } => Some((source, dest)),
            _ => None,
        })
    }

    fn require(&self, name: &str) -> HostResult<()> {
        if self.nodes.contains(name) {
            Ok(())
        } else {
            Err(HostError::UnknownNode(name.to_string()))
        }
    }

    fn insert(&mut self, name: &str) -> HostResult<()> {
        if !self.nodes.insert(name.to_string()) {
            return Err(HostError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }
}

impl SceneHost for RecordingHost {
    fn create_node(&mut self, kind: HostNodeKind, name: &str) -> HostResult<()> {
        self.insert(name)?;
        self.ops.push(HostOp::Create {
            kind,
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_parent(&mut self, child: &str, parent: &str) -> HostResult<()> {
        self.require(child)?;
        self.require(parent)?;
        self.ops.push(HostOp::Parent {
            child: child.to_string(),
            parent: parent.to_string(),
        });
        Ok(())
    }

    fn group(&mut self, children: &[&str], name: &str) -> HostResult<()> {
        for c in children {
            self.require(c)?;
        }
        self.insert(name)?;
        self.ops.push(HostOp::Group {
            name: name.to_string(),
            children: children.iter().map(|c| c.to_string()).collect(),
        });
        Ok(())
    }

    fn add_attr(&mut self, node: &str, attr: &str, spec: &AttrSpec) -> HostResult<()> {
        self.require(node)?;
        self.ops.push(HostOp::AddAttr {
            node: node.to_string(),
            attr: attr.to_string(),
            default: spec.default,
        });
        Ok(())
    }

    fn set_attr(&mut self, plug: &Plug, value: f32) -> HostResult<()> {
        self.require(&plug.node)?;
        self.ops.push(HostOp::SetAttr {
            plug: plug.clone(),
            value,
        });
        Ok(())
    }

    fn set_matrix(&mut self, node: &str, _world: &Mat4) -> HostResult<()> {
        self.require(node)?;
        self.ops.push(HostOp::SetMatrix {
            node: node.to_string(),
        });
        Ok(())
    }

    fn set_matrix_attr(&mut self, plug: &Plug, value: &Mat4) -> HostResult<()> {
        self.require(&plug.node)?;
        self.ops.push(HostOp::SetMatrixAttr {
            plug: plug.clone(),
            value: *value,
        });
        Ok(())
    }

    fn connect(&mut self, source: &Plug, dest: &Plug, force: bool) -> HostResult<()> {
        self.require(&source.node)?;
        self.require(&dest.node)?;
        if !self.connected.insert(dest.clone()) && !force {
            return Err(HostError::Rejected {
                op: "connect",
                target: format!("{}.{}", dest.node, dest.attr),
                reason: "input already connected".into(),
            });
        }
        self.ops.push(HostOp::Connect {
            source: source.clone(),
            dest: dest.clone(),
            force,
        });
        Ok(())
    }

    fn set_shape(&mut self, node: &str, curves: &[ShapeCurve], _color: Option<[f32; 3]>) -> HostResult<()> {
        self.require(node)?;
        self.ops.push(HostOp::Shape {
            node: node.to_string(),
            curves: curves.len(),
        });
        Ok(())
    }

    fn lock(&mut self, node: &str, channel: Lock) -> HostResult<()> {
        self.require(node)?;
        self.ops.push(HostOp::Lock {
            node: node.to_string(),
            channel,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrRef, BlendSource, ScalarDriver};
    use glam::Vec3;

    fn small_graph() -> RigGraph {
        let mut g = RigGraph::new();
        let grp = g.add_node("grp", NodeKind::Group, Mat4::IDENTITY);
        let a = g.add_node("a", NodeKind::Control, Mat4::IDENTITY);
        let b = g.add_node("b", NodeKind::Control, Mat4::from_translation(Vec3::X));
        let t = g.add_node("t", NodeKind::Srt, Mat4::IDENTITY);
        g.set_parent(a, grp).unwrap();
        g.set_parent(b, grp).unwrap();
        let w = g.add_attr(a, "blend", AttrSpec::range(0.5, 0.0, 1.0)).unwrap();
        g.add_blend_edge(
            t,
            Channel::Translate,
            vec![
                BlendSource::new(a, WeightExpr::Attr(w.clone()).reverse()),
                BlendSource::new(b, WeightExpr::Attr(w)),
            ],
            BlendMode::PoleReverseSwitch,
        )
        .unwrap();
        g.add_driver(ScalarDriver {
            name: "len".into(),
            expr: ScalarExpr::div(ScalarExpr::distance(a, b), ScalarExpr::constant(2.0)),
            outputs: vec![AttrRef::new(t, "scaleX")],
        })
        .unwrap();
        g
    }

    #[test]
    fn nodes_come_before_connections() {
        let g = small_graph();
        let mut host = RecordingHost::new();
        materialize(&g, &ShapeLibrary::builtin(), &mut host).unwrap();
        for name in ["grp", "a", "b", "t"] {
            assert!(host.has_node(name), "{name}");
        }
        let last_create = host
            .ops
            .iter()
            .rposition(|op| matches!(op, HostOp::Create { kind: HostNodeKind::Transform(_), .. }))
            .unwrap();
        let first_connect = host
            .position(|op| matches!(op, HostOp::Connect { .. }))
            .unwrap();
        assert!(last_create < first_connect);
        let group_at = host
            .position(|op| matches!(op, HostOp::Group { name, .. } if name == "grp"))
            .unwrap();
        let parent_at = host
            .position(|op| matches!(op, HostOp::Parent { child, .. } if child == "a"))
            .unwrap();
        assert!(group_at < parent_at);
    }

    #[test]
    fn translate_blend_goes_through_decompose() {
        let g = small_graph();
        let mut host = RecordingHost::new();
        materialize(&g, &ShapeLibrary::builtin(), &mut host).unwrap();
        let into_translate: Vec<_> = host
            .connections()
            .filter(|(_, d)| d.node == "t" && d.attr == "translate")
            .collect();
        assert_eq!(into_translate.len(), 1);
        assert_eq!(into_translate[0].0.attr, "outputTranslate");
        // the reversed weight is a reverse node fed by the attribute
        assert!(host
            .connections()
            .any(|(s, d)| s.node == "a" && s.attr == "blend" && d.attr == "input"));
        assert!(host
            .connections()
            .any(|(_, d)| d.node == "t" && d.attr == "scaleX"));
    }

    fn feeding(host: &RecordingHost, node: &str, attr: &str) -> Plug {
        host.connections()
            .find(|(_, d)| d.node == node && d.attr == attr)
            .map(|(s, _)| s.clone())
            .unwrap_or_else(|| panic!("{node}.{attr} is not connected"))
    }

    fn constant(host: &RecordingHost, node: &str, attr: &str) -> Mat4 {
        host.ops
            .iter()
            .find_map(|op| match op {
                HostOp::SetMatrixAttr { plug, value } if plug.node == node && plug.attr == attr => Some(*value),
                _ => None,
            })
            .unwrap_or_else(|| panic!("{node}.{attr} has no constant"))
    }

    fn kind_of(host: &RecordingHost, node: &str) -> HostNodeKind {
        host.ops
            .iter()
            .find_map(|op| match op {
                HostOp::Create { kind, name } if name == node => Some(*kind),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn sources_enter_as_motion_since_bind() {
        let g = small_graph();
        let mut host = RecordingHost::new();
        materialize(&g, &ShapeLibrary::builtin(), &mut host).unwrap();

        let decompose = feeding(&host, "t", "translate").node;
        let local = feeding(&host, &decompose, "inputMatrix").node;
        assert_eq!(kind_of(&host, &local), HostNodeKind::MultMatrix);
        // t has no parent: switch result times t's bind world
        let sum = feeding(&host, &local, "matrixIn[0]").node;
        assert_eq!(kind_of(&host, &sum), HostNodeKind::WeightedMatrixSum);
        assert_eq!(constant(&host, &local, "matrixIn[1]"), Mat4::IDENTITY);

        let delta = feeding(&host, &sum, "matrixIn[1]").node;
        assert_eq!(kind_of(&host, &delta), HostNodeKind::MultMatrix);
        assert_eq!(feeding(&host, &delta, "matrixIn[0]"), Plug::new("b", "worldMatrix"));
        let inverse_bind = constant(&host, &delta, "matrixIn[1]");
        assert!(inverse_bind.abs_diff_eq(Mat4::from_translation(-Vec3::X), 1e-6));
    }

    #[test]
    fn additive_parent_keeps_the_rest_weight_on_identity() {
        let mut g = RigGraph::new();
        let p = g.add_node("p", NodeKind::Control, Mat4::from_translation(Vec3::Y));
        let t = g.add_node("t", NodeKind::Srt, Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)));
        let s = g.add_node("s", NodeKind::Control, Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)));
        g.set_parent(t, p).unwrap();
        let follow = g.add_attr(s, "follow", AttrSpec::range(1.0, 0.0, 1.0)).unwrap();
        g.add_blend_edge(
            t,
            Channel::All,
            vec![BlendSource::new(s, WeightExpr::Attr(follow))],
            BlendMode::AdditiveParent,
        )
        .unwrap();
        let mut host = RecordingHost::new();
        materialize(&g, &ShapeLibrary::builtin(), &mut host).unwrap();

        // offsetParent = p⁻¹ · (w·Δ + (1 - w)·I) · p, so world = offset · p · local
        let local = feeding(&host, "t", "offsetParentMatrix").node;
        assert_eq!(feeding(&host, &local, "matrixIn[0]"), Plug::new("p", "worldInverseMatrix"));
        assert_eq!(feeding(&host, &local, "matrixIn[2]"), Plug::new("p", "worldMatrix"));
        assert!(!host
            .ops
            .iter()
            .any(|op| matches!(op, HostOp::SetMatrixAttr { plug, .. } if plug.node == local)));

        let sum = feeding(&host, &local, "matrixIn[1]").node;
        assert_eq!(feeding(&host, &sum, "weightIn[0]"), Plug::new("s", "follow"));
        assert_eq!(constant(&host, &sum, "matrixIn[1]"), Mat4::IDENTITY);
        let rest = feeding(&host, &sum, "weightIn[1]").node;
        assert_eq!(kind_of(&host, &rest), HostNodeKind::Reverse);
        assert_eq!(feeding(&host, &rest, "input"), Plug::new("s", "follow"));
    }

    #[test]
    fn parented_targets_cancel_the_parent_at_rest() {
        let mut g = RigGraph::new();
        let p = g.add_node("p", NodeKind::Joint, Mat4::from_translation(Vec3::Y));
        let t = g.add_node("t", NodeKind::Joint, Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)));
        let s = g.add_node("s", NodeKind::Joint, Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)));
        g.set_parent(t, p).unwrap();
        g.add_blend_edge(
            t,
            Channel::All,
            vec![BlendSource::new(s, WeightExpr::Constant(1.0))],
            BlendMode::WeightedAverage,
        )
        .unwrap();
        let mut host = RecordingHost::new();
        materialize(&g, &ShapeLibrary::builtin(), &mut host).unwrap();

        let local = feeding(&host, "t", "offsetParentMatrix").node;
        assert_eq!(feeding(&host, &local, "matrixIn[0]"), Plug::new("p", "worldInverseMatrix"));
        let delta = feeding(&host, &local, "matrixIn[1]").node;
        assert_eq!(feeding(&host, &delta, "matrixIn[0]"), Plug::new("s", "worldMatrix"));
        // bind world · bind local⁻¹ is the parent's bind world, so p⁻¹ · I · p = I at rest
        let tail = constant(&host, &local, "matrixIn[2]");
        assert!(tail.abs_diff_eq(Mat4::from_translation(Vec3::Y), 1e-6));
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        let mut host = RecordingHost::new();
        assert_eq!(
            host.set_parent("x", "y").unwrap_err(),
            HostError::UnknownNode("x".into())
        );
        host.create_node(HostNodeKind::Reverse, "r").unwrap();
        assert_eq!(
            host.create_node(HostNodeKind::Reverse, "r").unwrap_err(),
            HostError::DuplicateNode("r".into())
        );
    }
}
