//! Rig graph compiler.
//!
//! Builds articulated control rigs (IK/FK limbs, bezier ribbons, surface pin grids,
//! lattices, deformation cages, eye dilation, global placement controls) as an explicit,
//! serializable transform blend graph.
//! The graph is checked numerically with [`eval::evaluate`] and handed to a scene engine
//! through [`host::materialize`].

pub mod binder;
pub mod compile;
pub mod config;
pub mod error;
pub mod eval;
pub mod geometry;
pub mod graph;
pub mod host;
pub mod ids;
pub mod joint;
pub mod json;
pub mod patch;
pub mod shapes;

pub use binder::{BindPlan, Influence, InfluenceSet};
pub use compile::basic::{compile_basic_rig, BasicRig};
pub use compile::cage::{compile_cage, CageMesh, CageRig};
pub use compile::eye::{compile_eye, eye_joint_pose, EyeRig};
pub use compile::limb::{compile_limb, LimbRig};
pub use compile::surface::{
    compile_lattice, compile_pin_grid, compile_ribbon, LatticeRig, PinGridRig, RibbonRig,
};
pub use compile::{ControlRig, Staged};
pub use config::{CompilerConfig, EyeConfig, PinGridConfig};
pub use error::{
    CompileError, CompileResult, GeometryError, GraphError, ResourceError, StructuralError,
};
pub use eval::{evaluate, EvalContext, Evaluation};
pub use geometry::{Axis, BoundingBox};
pub use graph::{
    AttrRef, BlendEdge, BlendMode, BlendSource, Channel, ControlRole, NodeKind, QuatPart,
    RigGraph, ScalarDriver, ScalarExpr, StretchDriver, TransformNode, WeightExpr,
};
pub use host::{materialize, HostError, RecordingHost, SceneHost};
pub use ids::{JointId, NodeId};
pub use joint::{JointHierarchy, JointSpec};
pub use json::{graph_from_json, graph_to_json, parse_config, parse_hierarchy, JsonError};
pub use patch::{
    distribute_pin_grid, distribute_pins, BezierRibbonSurface, PinPlacement, Surface,
};
pub use shapes::ShapeLibrary;
