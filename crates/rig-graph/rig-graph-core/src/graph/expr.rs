//! Weight expressions for blend edges and scalar expressions for driver networks.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::ids::NodeId;

/// Animatable scalar attribute on a node, e.g. `host.IkFkSwitch`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrRef {
    pub node: NodeId,
    pub attr: String,
}

impl AttrRef {
    pub fn new(node: NodeId, attr: impl Into<String>) -> Self {
        AttrRef {
            node,
            attr: attr.into(),
        }
    }
}

/// Read access to attribute values and node positions while evaluating expressions.
pub trait ScalarContext {
    fn attr(&self, attr: &AttrRef) -> Result<f32, GraphError>;
    fn position(&self, node: NodeId) -> Result<Vec3, GraphError>;
}

/// Weight of one source in a blend edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WeightExpr {
    Constant(f32),
    Attr(AttrRef),
    /// `1 - inner`. Kept symbolic so both weights share one source of truth.
    Reverse(Box<WeightExpr>),
}

impl WeightExpr {
    pub fn constant(value: f32) -> Self {
        WeightExpr::Constant(value)
    }

    pub fn attr(node: NodeId, attr: impl Into<String>) -> Self {
        WeightExpr::Attr(AttrRef::new(node, attr))
    }

    pub fn reverse(self) -> Self {
        WeightExpr::Reverse(Box::new(self))
    }

    pub fn eval(&self, ctx: &dyn ScalarContext) -> Result<f32, GraphError> {
        match self {
            WeightExpr::Constant(v) => Ok(*v),
            WeightExpr::Attr(r) => ctx.attr(r),
            WeightExpr::Reverse(inner) => Ok(1.0 - inner.eval(ctx)?),
        }
    }

    pub fn attr_refs(&self) -> Vec<&AttrRef> {
        match self {
            WeightExpr::Constant(_) => Vec::new(),
            WeightExpr::Attr(r) => vec![r],
            WeightExpr::Reverse(inner) => inner.attr_refs(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compare {
    Greater,
    Less,
    Equal,
}

impl Compare {
    fn holds(self, lhs: f32, rhs: f32) -> bool {
        match self {
            Compare::Greater => lhs > rhs,
            Compare::Less => lhs < rhs,
            Compare::Equal => lhs == rhs,
        }
    }
}

/// Component of the quaternion for a rotation about X.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuatPart {
    /// `sin(angle / 2)`
    X,
    /// `cos(angle / 2)`
    W,
}

/// Scalar driver network, lowered by the host into arithmetic/condition nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalarExpr {
    Constant { value: f32 },
    Attr { attr: AttrRef },
    Distance { a: NodeId, b: NodeId },
    /// Sum of distances between consecutive nodes.
    ChainLength { nodes: Vec<NodeId> },
    Add { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Sub { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Mul { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Div { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Min { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Max { lhs: Box<ScalarExpr>, rhs: Box<ScalarExpr> },
    Reverse { input: Box<ScalarExpr> },
    /// `input` clamped to `0..=1`, looked up on the linear ramp `ramp[0] -> ramp[1]` and
    /// mapped from `0..=1` onto `output[0] -> output[1]`.
    Remap {
        input: Box<ScalarExpr>,
        ramp: [f32; 2],
        output: [f32; 2],
    },
    /// One quaternion component of a rotation about X by `degrees`.
    RotateXQuat { degrees: Box<ScalarExpr>, part: QuatPart },
    Condition {
        op: Compare,
        lhs: Box<ScalarExpr>,
        rhs: Box<ScalarExpr>,
        if_true: Box<ScalarExpr>,
        if_false: Box<ScalarExpr>,
    },
}

macro_rules! binary_ctor {
    ($name:ident, $variant:ident) => {
        pub fn $name(lhs: ScalarExpr, rhs: ScalarExpr) -> ScalarExpr {
            ScalarExpr::$variant {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
    };
}

impl ScalarExpr {
    pub fn constant(value: f32) -> Self {
        ScalarExpr::Constant { value }
    }

    pub fn attr(node: NodeId, attr: impl Into<String>) -> Self {
        ScalarExpr::Attr {
            attr: AttrRef::new(node, attr),
        }
    }

    pub fn distance(a: NodeId, b: NodeId) -> Self {
        ScalarExpr::Distance { a, b }
    }

    pub fn chain_length(nodes: Vec<NodeId>) -> Self {
        ScalarExpr::ChainLength { nodes }
    }

    binary_ctor!(add, Add);
    binary_ctor!(sub, Sub);
    binary_ctor!(mul, Mul);
    binary_ctor!(div, Div);
    binary_ctor!(min, Min);
    binary_ctor!(max, Max);

    pub fn reverse(input: ScalarExpr) -> Self {
        ScalarExpr::Reverse {
            input: Box::new(input),
        }
    }

    pub fn remap(input: ScalarExpr, ramp: [f32; 2], output: [f32; 2]) -> Self {
        ScalarExpr::Remap {
            input: Box::new(input),
            ramp,
            output,
        }
    }

    pub fn rotate_x_quat(degrees: ScalarExpr, part: QuatPart) -> Self {
        ScalarExpr::RotateXQuat {
            degrees: Box::new(degrees),
            part,
        }
    }

    pub fn condition(
        op: Compare,
        lhs: ScalarExpr,
        rhs: ScalarExpr,
        if_true: ScalarExpr,
        if_false: ScalarExpr,
    ) -> Self {
        ScalarExpr::Condition {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// Nodes whose transforms this expression reads.
    pub fn transform_inputs(&self, out: &mut Vec<NodeId>) {
        match self {
            ScalarExpr::Constant { .. } | ScalarExpr::Attr { .. } => {}
            ScalarExpr::Distance { a, b } => out.extend([*a, *b]),
            ScalarExpr::ChainLength { nodes } => out.extend(nodes.iter().copied()),
            ScalarExpr::Add { lhs, rhs }
            | ScalarExpr::Sub { lhs, rhs }
            | ScalarExpr::Mul { lhs, rhs }
            | ScalarExpr::Div { lhs, rhs }
            | ScalarExpr::Min { lhs, rhs }
            | ScalarExpr::Max { lhs, rhs } => {
                lhs.transform_inputs(out);
                rhs.transform_inputs(out);
            }
            ScalarExpr::Reverse { input } | ScalarExpr::Remap { input, .. } => input.transform_inputs(out),
            ScalarExpr::RotateXQuat { degrees, .. } => degrees.transform_inputs(out),
            ScalarExpr::Condition {
                lhs,
                rhs,
                if_true,
                if_false,
                ..
            } => {
                for e in [lhs, rhs, if_true, if_false] {
                    e.transform_inputs(out);
                }
            }
        }
    }

    pub fn eval(&self, ctx: &dyn ScalarContext) -> Result<f32, GraphError> {
        Ok(match self {
            ScalarExpr::Constant { value } => *value,
            ScalarExpr::Attr { attr } => ctx.attr(attr)?,
            ScalarExpr::Distance { a, b } => ctx.position(*a)?.distance(ctx.position(*b)?),
            ScalarExpr::ChainLength { nodes } => {
                let points = nodes
                    .iter()
                    .map(|n| ctx.position(*n))
                    .collect::<Result<Vec<_>, _>>()?;
                crate::geometry::chain_length(&points)
            }
            ScalarExpr::Add { lhs, rhs } => lhs.eval(ctx)? + rhs.eval(ctx)?,
            ScalarExpr::Sub { lhs, rhs } => lhs.eval(ctx)? - rhs.eval(ctx)?,
            ScalarExpr::Mul { lhs, rhs } => lhs.eval(ctx)? * rhs.eval(ctx)?,
            ScalarExpr::Div { lhs, rhs } => {
                let d = rhs.eval(ctx)?;
                if d != 0.0 {
                    lhs.eval(ctx)? / d
                } else {
                    f32::NAN
                }
            }
            ScalarExpr::Min { lhs, rhs } => lhs.eval(ctx)?.min(rhs.eval(ctx)?),
            ScalarExpr::Max { lhs, rhs } => lhs.eval(ctx)?.max(rhs.eval(ctx)?),
            ScalarExpr::Reverse { input } => 1.0 - input.eval(ctx)?,
            ScalarExpr::Remap { input, ramp, output } => {
                let x = input.eval(ctx)?.clamp(0.0, 1.0);
                let r = ramp[0] + (ramp[1] - ramp[0]) * x;
                output[0] + (output[1] - output[0]) * r
            }
            ScalarExpr::RotateXQuat { degrees, part } => {
                let half = degrees.eval(ctx)?.to_radians() * 0.5;
                match part {
                    QuatPart::X => half.sin(),
                    QuatPart::W => half.cos(),
                }
            }
            ScalarExpr::Condition {
                op,
                lhs,
                rhs,
                if_true,
                if_false,
            } => {
                if op.holds(lhs.eval(ctx)?, rhs.eval(ctx)?) {
                    if_true.eval(ctx)?
                } else {
                    if_false.eval(ctx)?
                }
            }
        })
    }
}

/// Expression whose value is written to one or more attributes every evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarDriver {
    pub name: String,
    pub expr: ScalarExpr,
    pub outputs: Vec<AttrRef>,
}

/// Length-ratio stretch/squash driver over three live chain points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StretchDriver {
    /// Captured once at bind time.
    pub reference_length: f32,
    pub points: [NodeId; 3],
    pub max_stretch: AttrRef,
    pub max_squash: AttrRef,
}

impl StretchDriver {
    /// `current / reference`, clamped to `max_stretch` when longer and to
    /// `1 - max_squash` when shorter. Exactly 1 at the reference length.
    pub fn scale_factor(reference: f32, current: f32, max_stretch: f32, max_squash: f32) -> f32 {
        let ratio = current / reference;
        if current > reference {
            ratio.min(max_stretch)
        } else if current < reference {
            ratio.max(1.0 - max_squash)
        } else {
            1.0
        }
    }

    /// Condition-node network equivalent to [`StretchDriver::scale_factor`].
    pub fn to_expr(&self) -> ScalarExpr {
        let current = || ScalarExpr::chain_length(self.points.to_vec());
        let reference = || ScalarExpr::constant(self.reference_length);
        let ratio = || ScalarExpr::div(current(), reference());
        ScalarExpr::condition(
            Compare::Greater,
            current(),
            reference(),
            ScalarExpr::min(
                ratio(),
                ScalarExpr::Attr {
                    attr: self.max_stretch.clone(),
                },
            ),
            ScalarExpr::condition(
                Compare::Less,
                current(),
                reference(),
                ScalarExpr::max(
                    ratio(),
                    ScalarExpr::reverse(ScalarExpr::Attr {
                        attr: self.max_squash.clone(),
                    }),
                ),
                ScalarExpr::constant(1.0),
            ),
        )
    }
}
