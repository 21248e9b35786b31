//! Global placement rig for a prop: a main control sized from the geometry footprint, two
//! nested local controls and a lattice around the geometry.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::CompilerConfig;
use crate::error::CompileResult;
use crate::geometry::{bounding_box_scale, BoundingBox};
use crate::graph::{
    BlendMode, BlendSource, Channel, ControlRole, LatticeSpec, NodeKind, RigGraph, WeightExpr,
};
use crate::ids::NodeId;
use crate::shapes::ShapeLibrary;

use super::{add_control, commit, ControlRig, ControlSpec, Staged};

pub const BASIC_LATTICE_DIVISIONS: [u32; 3] = [2, 2, 2];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicRig {
    pub group: NodeId,
    pub main: ControlRig,
    pub locals: [ControlRig; 2],
    pub lattice: NodeId,
    /// Main control footprint: geometry width times the footprint factor on X and Z.
    pub footprint: Vec3,
}

/// Footprint of the main control for geometry bounded by `geo`.
///
/// Y stays 1 so the control is flat but its transform remains invertible.
pub fn main_footprint(geo: &BoundingBox, factor: f32) -> CompileResult<Vec3> {
    let fit = bounding_box_scale(&BoundingBox::unit(), Vec3::ONE, geo)?;
    let width = fit.x * factor;
    Ok(Vec3::new(width, 1.0, width))
}

pub fn compile_basic_rig(
    graph: &mut RigGraph,
    geo_name: &str,
    geo_bbox: &BoundingBox,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<BasicRig> {
    let cfg = &config.basic;
    let footprint = main_footprint(geo_bbox, cfg.main_footprint).stage("basic footprint", geo_name)?;

    commit(graph, |g| {
        log::info!("basic rig '{geo_name}': footprint {footprint}");
        let group = g.add_node(format!("{geo_name}_ctl"), NodeKind::Group, Mat4::IDENTITY);

        let main = add_control(
            g,
            library,
            Some(group),
            &ControlSpec {
                name: format!("{geo_name}_main"),
                role: ControlRole::Main,
                world: Mat4::IDENTITY,
                shape: &cfg.main_shape,
                size: footprint.x,
                color: None,
            },
        )
        .stage("basic main", geo_name)?;

        let mut parent = main.ctl;
        let mut locals = Vec::with_capacity(2);
        for (i, factor) in cfg.local_scales.iter().enumerate() {
            let local = add_control(
                g,
                library,
                Some(group),
                &ControlSpec {
                    name: format!("{geo_name}_local_{i}"),
                    role: ControlRole::Local(i as u8),
                    world: Mat4::IDENTITY,
                    shape: &cfg.local_shape,
                    size: footprint.x * factor,
                    color: None,
                },
            )
            .stage("basic local", geo_name)?;
            g.add_blend_edge(
                local.srt,
                Channel::All,
                vec![BlendSource::new(parent, WeightExpr::constant(1.0))],
                BlendMode::AdditiveParent,
            )
            .stage("basic local follow", geo_name)?;
            parent = local.ctl;
            locals.push(local);
        }

        let lattice = g.add_node(
            format!("{geo_name}_ffd"),
            NodeKind::Lattice,
            Mat4::from_translation(geo_bbox.center()),
        );
        g.set_parent(lattice, group)?;
        g.add_lattice(LatticeSpec {
            node: lattice,
            divisions: BASIC_LATTICE_DIVISIONS,
            bounds: *geo_bbox,
        })?;

        Ok(BasicRig {
            group,
            main,
            locals: [locals[0], locals[1]],
            lattice,
            footprint,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{evaluate, EvalContext};

    fn prop() -> BoundingBox {
        BoundingBox::new(Vec3::new(-2.0, 0.0, -1.0), Vec3::new(2.0, 3.0, 1.0))
    }

    #[test]
    fn footprint_scales_width() {
        // geometry is 4 wide, the unit box 2
        assert_eq!(main_footprint(&prop(), 2.5).unwrap(), Vec3::new(5.0, 1.0, 5.0));
    }

    #[test]
    fn locals_are_chained_and_sized() {
        let mut g = RigGraph::new();
        let rig = compile_basic_rig(
            &mut g,
            "rock",
            &prop(),
            &ShapeLibrary::builtin(),
            &CompilerConfig::default(),
        )
        .unwrap();
        let size = |id| g.node(id).unwrap().shape.as_ref().unwrap().size;
        assert_eq!(size(rig.main.ctl), 5.0);
        assert!((size(rig.locals[0].ctl) - 4.25).abs() < 1e-5);
        assert!((size(rig.locals[1].ctl) - 3.5).abs() < 1e-5);
        assert_eq!(g.node(rig.group).unwrap().name, "rock_ctl");
        assert_eq!(g.node(rig.lattice).unwrap().name, "rock_ffd");
        assert_eq!(g.node(rig.lattice).unwrap().parent, Some(rig.group));
        assert_eq!(g.lattices()[0].divisions, [2, 2, 2]);

        let mut ctx = EvalContext::new();
        ctx.translate(&g, rig.main.ctl, Vec3::X).unwrap();
        ctx.translate(&g, rig.locals[0].ctl, Vec3::Z).unwrap();
        let out = evaluate(&g, &ctx).unwrap();
        let end = out.position(rig.locals[1].ctl).unwrap();
        assert!(end.distance(Vec3::new(1.0, 0.0, 1.0)) < 1e-5);
    }

    #[test]
    fn zero_width_geometry_gives_zero_footprint() {
        let mut g = RigGraph::new();
        let flat = BoundingBox::new(Vec3::ZERO, Vec3::new(0.0, 1.0, 1.0));
        let rig = compile_basic_rig(
            &mut g,
            "card",
            &flat,
            &ShapeLibrary::builtin(),
            &CompilerConfig::default(),
        )
        .unwrap();
        assert_eq!(rig.footprint.x, 0.0);
    }
}
