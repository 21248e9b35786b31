//! Error taxonomy for rig compilation.
//!
//! Every error is raised at the point of detection and aborts the enclosing compile step.
//! Nothing here is transient, so callers never retry; they fix the input instead.

use thiserror::Error;

use crate::ids::{JointId, NodeId};

/// Malformed caller input: the joint hierarchy or counts requested from it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("joint hierarchy is empty")]
    EmptyHierarchy,
    #[error("chain starting at '{root}' has {found} joints, at least {required} are required")]
    InsufficientChainLength {
        root: String,
        found: usize,
        required: usize,
    },
    #[error("{joint} references missing parent {parent}")]
    MissingParent { joint: JointId, parent: JointId },
    #[error("{0} is not part of the hierarchy")]
    UnknownJoint(JointId),
    #[error("{0} is declared more than once")]
    DuplicateJoint(JointId),
    #[error("child list of {parent} disagrees with the parent link of {child}")]
    InconsistentChildren { parent: JointId, child: JointId },
    #[error("joint hierarchy contains a cycle through {0}")]
    CyclicHierarchy(JointId),
    #[error("pin distribution needs at least 2 pins, got {0}")]
    InsufficientPinCount(usize),
    #[error("pin grid needs at least one pin along u and v, got {u} x {v}")]
    EmptyPinGrid { u: usize, v: usize },
    #[error("eye rig needs at least 1 subdivision, got {0}")]
    InsufficientEyeSubdivisions(usize),
    #[error("cage mesh '{mesh}' has {vertices} vertices but {found} {what}")]
    CageMismatch {
        mesh: String,
        vertices: usize,
        found: usize,
        what: &'static str,
    },
}

/// Violations of the transform blend graph invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("blending {driver} into {target} would close a cycle")]
    Cycle { target: NodeId, driver: NodeId },
    #[error("blend edge for {0} has no sources")]
    EmptySources(NodeId),
    #[error("{0} does not exist in the graph")]
    UnknownNode(NodeId),
    #[error("{node} has no attribute '{attr}'")]
    UnknownAttribute { node: NodeId, attr: String },
}

/// Degenerate input to the geometric helpers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("bounding box has zero extent along {axis}")]
    DegenerateBounds { axis: char },
    #[error("segment {index} of the chain has zero length")]
    ZeroLengthSegment { index: usize },
    #[error("chain is collinear, pole direction is undefined")]
    CollinearChain,
    #[error("weights sum to zero")]
    ZeroTotalWeight,
    #[error("point list is empty")]
    NoPoints,
    #[error("normal vector has zero length")]
    ZeroNormal,
}

/// Missing lookups against external resources.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("unknown control shape '{0}'")]
    UnknownControlShape(String),
    #[error("point {point} has no influences")]
    NoInfluence { point: usize },
    #[error("influence weight {weight} on point {point} is negative")]
    NegativeWeight { point: usize, weight: f32 },
    #[error("shape library parse error: {0}")]
    ShapeParse(String),
}

/// Aggregate error returned by every compiler entry point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("{stage} failed at '{target}': {source}")]
    Stage {
        stage: &'static str,
        target: String,
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// Wrap `self` with the stage and target name that were being built.
    pub fn at(self, stage: &'static str, target: impl Into<String>) -> Self {
        CompileError::Stage {
            stage,
            target: target.into(),
            source: Box::new(self),
        }
    }

    /// Strip any stage context and return the underlying error.
    pub fn root_cause(&self) -> &CompileError {
        match self {
            CompileError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
