//! Rig compilers. Each one builds into a scratch copy of the graph and commits only on
//! success, so a failed build leaves the caller's graph as it was.

pub mod basic;
pub mod cage;
pub mod eye;
pub mod limb;
pub mod surface;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::graph::{ControlRole, ControlShape, NodeKind, RigGraph};
use crate::ids::NodeId;
use crate::shapes::ShapeLibrary;

/// `null` holds the static placement, `srt` receives runtime offsets, `ctl` is what the
/// animator grabs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRig {
    pub role: ControlRole,
    pub null: NodeId,
    pub srt: NodeId,
    pub ctl: NodeId,
}

#[derive(Clone, Debug)]
pub struct ControlSpec<'a> {
    pub name: String,
    pub role: ControlRole,
    pub world: Mat4,
    pub shape: &'a str,
    pub size: f32,
    pub color: Option<[f32; 3]>,
}

/// Create the `null -> srt -> ctl` stack for one control.
pub fn add_control(
    graph: &mut RigGraph,
    library: &ShapeLibrary,
    parent: Option<NodeId>,
    spec: &ControlSpec<'_>,
) -> CompileResult<ControlRig> {
    library.get(spec.shape)?;
    let null = graph.add_node(format!("{}_null", spec.name), NodeKind::Null, spec.world);
    let srt = graph.add_node(format!("{}_srt", spec.name), NodeKind::Srt, spec.world);
    let ctl = graph.add_node(format!("{}_ctl", spec.name), NodeKind::Control, spec.world);
    if let Some(p) = parent {
        graph.set_parent(null, p)?;
    }
    graph.set_parent(srt, null)?;
    graph.set_parent(ctl, srt)?;
    graph.set_role(ctl, spec.role)?;
    graph.set_shape(
        ctl,
        ControlShape {
            key: spec.shape.to_string(),
            size: spec.size,
            color: spec.color,
        },
    )?;
    Ok(ControlRig {
        role: spec.role,
        null,
        srt,
        ctl,
    })
}

/// Run `build` against a copy of `graph`, replacing `graph` only when it succeeds.
pub fn commit<T>(
    graph: &mut RigGraph,
    build: impl FnOnce(&mut RigGraph) -> CompileResult<T>,
) -> CompileResult<T> {
    let mut scratch = graph.clone();
    let out = build(&mut scratch)?;
    *graph = scratch;
    Ok(out)
}

/// Attach stage context to any error convertible into [`CompileError`].
pub trait Staged<T> {
    fn stage(self, stage: &'static str, target: &str) -> CompileResult<T>;
}

impl<T, E: Into<CompileError>> Staged<T> for Result<T, E> {
    fn stage(self, stage: &'static str, target: &str) -> CompileResult<T> {
        self.map_err(|e| {
            let err = e.into().at(stage, target);
            log::error!("{err}");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;

    #[test]
    fn control_stack_is_chained() {
        let mut g = RigGraph::new();
        let lib = ShapeLibrary::builtin();
        let grp = g.add_node("grp", NodeKind::Group, Mat4::IDENTITY);
        let rig = add_control(
            &mut g,
            &lib,
            Some(grp),
            &ControlSpec {
                name: "arm_pole".into(),
                role: ControlRole::Pole,
                world: Mat4::from_translation(glam::Vec3::Z),
                shape: "sphere",
                size: 0.5,
                color: None,
            },
        )
        .unwrap();
        assert_eq!(g.node(rig.null).unwrap().parent, Some(grp));
        assert_eq!(g.node(rig.srt).unwrap().parent, Some(rig.null));
        assert_eq!(g.node(rig.ctl).unwrap().parent, Some(rig.srt));
        assert_eq!(g.role(ControlRole::Pole).unwrap().id, rig.ctl);
        assert_eq!(g.node(rig.ctl).unwrap().name, "arm_pole_ctl");
    }

    #[test]
    fn failed_commit_leaves_graph_untouched() {
        let mut g = RigGraph::new();
        g.add_node("keep", NodeKind::Group, Mat4::IDENTITY);
        let before = g.clone();
        let lib = ShapeLibrary::builtin();
        let err = commit(&mut g, |scratch| {
            scratch.add_node("partial", NodeKind::Null, Mat4::IDENTITY);
            add_control(
                scratch,
                &lib,
                None,
                &ControlSpec {
                    name: "x".into(),
                    role: ControlRole::Main,
                    world: Mat4::IDENTITY,
                    shape: "star",
                    size: 1.0,
                    color: None,
                },
            )
        })
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::Resource(ResourceError::UnknownControlShape("star".into()))
        );
        assert_eq!(g, before);
    }
}
