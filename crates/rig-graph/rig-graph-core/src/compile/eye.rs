//! Iris/pupil dilation rig.
//!
//! A row of joints, one per edge loop of an X-facing sphere. Each joint slides along X
//! and shrinks in Y/Z like a point on a circle rotating about X, so the loops gather
//! towards the front of the eye. Joints before `pupil_edge` follow the `Iris` attribute,
//! the rest follow `Pupil`.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::CompilerConfig;
use crate::error::{CompileResult, StructuralError};
use crate::geometry::Axis;
use crate::graph::{
    AttrRef, AttrSpec, ControlRole, NodeKind, QuatPart, RigGraph, ScalarDriver, ScalarExpr,
    SkinBinding,
};
use crate::ids::NodeId;
use crate::shapes::ShapeLibrary;

use super::{add_control, commit, ControlRig, ControlSpec, Staged};

pub const IRIS: &str = "Iris";
pub const PUPIL: &str = "Pupil";

/// Upper bound on the driven Y/Z scale.
pub const EYE_SCALE_LIMIT: f32 = 1000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EyeRig {
    pub group: NodeId,
    pub joint_group: NodeId,
    /// Back to front.
    pub joints: Vec<NodeId>,
    pub mesh: NodeId,
    pub control: ControlRig,
    pub iris: AttrRef,
    pub pupil: AttrRef,
}

/// Ramp half-height and output start of joint `index` out of `joints`.
fn joint_ramp(index: usize, joints: usize) -> (f32, f32) {
    let t = index as f32 / (joints - 1) as f32;
    (1.0 - t, t)
}

/// `(translateX, scaleYZ)` of joint `index` out of `joints` for an Iris/Pupil `value`.
pub fn eye_joint_pose(index: usize, joints: usize, value: f32) -> (f32, f32) {
    let (half_height, start) = joint_ramp(index, joints);
    let ramp = -half_height + 2.0 * half_height * value.clamp(0.0, 1.0);
    let out = start + (0.0 - start) * ramp;
    let half = (out * 180.0).to_radians() * 0.5;
    (half.sin(), half.cos().clamp(0.0, EYE_SCALE_LIMIT))
}

pub fn compile_eye(
    graph: &mut RigGraph,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<EyeRig> {
    let cfg = &config.eye;
    let name = cfg.name.as_str();
    if cfg.subdivisions == 0 {
        return Err(StructuralError::InsufficientEyeSubdivisions(0).into());
    }
    let count = cfg.subdivisions + 1;
    if cfg.pupil_edge >= count {
        log::debug!("eye '{name}': pupil edge {} past the last joint, all joints follow {IRIS}", cfg.pupil_edge);
    }

    commit(graph, |g| {
        log::info!("eye '{name}': {count} joints");
        let group = g.add_node(name, NodeKind::Group, Mat4::IDENTITY);
        let joint_group = g.add_node(format!("{name}_bnd"), NodeKind::Group, Mat4::IDENTITY);
        g.set_parent(joint_group, group)?;
        let mesh = g.add_node(format!("{name}_blend"), NodeKind::Mesh, Mat4::IDENTITY);
        g.set_parent(mesh, group)?;

        let control = add_control(
            g,
            library,
            Some(group),
            &ControlSpec {
                name: name.to_string(),
                role: ControlRole::Eye,
                world: Mat4::IDENTITY,
                shape: &cfg.control_shape,
                size: cfg.control_size,
                color: None,
            },
        )
        .stage("eye control", name)?;
        let iris = g.add_attr(control.ctl, IRIS, AttrSpec::range(cfg.iris, 0.0, 1.0))?;
        let pupil = g.add_attr(control.ctl, PUPIL, AttrSpec::range(cfg.pupil, 0.0, 1.0))?;

        let mut joints = Vec::with_capacity(count);
        for i in 0..count {
            let (input, value) = if i < cfg.pupil_edge {
                (&iris, cfg.iris)
            } else {
                (&pupil, cfg.pupil)
            };
            let (tx, s) = eye_joint_pose(i, count, value);
            let rest = Mat4::from_scale_rotation_translation(Vec3::new(1.0, s, s), Quat::IDENTITY, tx * Vec3::X);
            let joint = g.add_node(format!("{name}_{i}_bnd"), NodeKind::Joint, rest);
            g.set_parent(joint, joint_group)?;

            let (half_height, start) = joint_ramp(i, count);
            let degrees = ScalarExpr::mul(
                ScalarExpr::remap(
                    ScalarExpr::Attr { attr: input.clone() },
                    [-half_height, half_height],
                    [start, 0.0],
                ),
                ScalarExpr::constant(180.0),
            );
            g.add_driver(ScalarDriver {
                name: format!("{name}_{i}_slide"),
                expr: ScalarExpr::rotate_x_quat(degrees.clone(), QuatPart::X),
                outputs: vec![AttrRef::new(joint, Axis::X.translate_attr())],
            })
            .stage("eye slide", name)?;
            g.add_driver(ScalarDriver {
                name: format!("{name}_{i}_shrink"),
                expr: ScalarExpr::min(
                    ScalarExpr::max(
                        ScalarExpr::rotate_x_quat(degrees, QuatPart::W),
                        ScalarExpr::constant(0.0),
                    ),
                    ScalarExpr::constant(EYE_SCALE_LIMIT),
                ),
                outputs: [Axis::Y, Axis::Z]
                    .into_iter()
                    .map(|a| AttrRef::new(joint, a.scale_attr()))
                    .collect(),
            })
            .stage("eye shrink", name)?;
            joints.push(joint);
        }

        // Host default weights; per-loop weights need the sphere topology.
        g.add_skin(SkinBinding {
            name: format!("{name}_skin"),
            deformer: mesh,
            influences: joints.clone(),
            points: Vec::new(),
            bind_pre: Vec::new(),
        })?;

        Ok(EyeRig {
            group,
            joint_group,
            joints,
            mesh,
            control,
            iris,
            pupil,
        })
    })
}
