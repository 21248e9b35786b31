//! Lattice and bezier-ribbon rigs.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::binder::{BindPlan, Influence, InfluenceSet};
use crate::config::CompilerConfig;
use crate::error::{CompileResult, GeometryError, StructuralError};
use crate::geometry::{aim_frame, bezier_control_points, center, lattice_corners, Axis, BoundingBox};
use crate::graph::{
    AttrRef, AttrSpec, BlendMode, BlendSource, Channel, ControlRole, CurveCv, CurveSpec,
    LatticeSpec, LoftSpec, NodeKind, PinAttachment, RigGraph, ScalarDriver, ScalarExpr,
    SkinBinding, StretchDriver, WeightExpr,
};
use crate::ids::{JointId, NodeId};
use crate::joint::JointHierarchy;
use crate::patch::{distribute_pin_grid, distribute_pins, BezierRibbonSurface, Surface};
use crate::shapes::ShapeLibrary;

use super::limb::{MAX_SQUASH, MAX_STRETCH};
use super::{add_control, commit, ControlRig, ControlSpec, Staged};

pub const ROUNDNESS: &str = "roundness";
pub const ROUND_TANGENT: &str = "roundTangent";
pub const PARAMETER_U: &str = "parameterU";
pub const PARAMETER_V: &str = "parameterV";

pub const LATTICE_DIVISIONS: [u32; 3] = [2, 3, 2];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeRig {
    pub group: NodeId,
    pub lattice: NodeId,
    /// Lower, middle, upper.
    pub tiers: [ControlRig; 3],
    pub joints: Vec<NodeId>,
    pub bulge: NodeId,
    pub bulge_driver: StretchDriver,
}

/// 2x3x2 lattice over `bounds` with one control per horizontal tier.
pub fn compile_lattice(
    graph: &mut RigGraph,
    bounds: &BoundingBox,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<LatticeRig> {
    let name = config.lattice.name.as_str();
    commit(graph, |g| build_lattice(g, bounds, library, config).stage("lattice", name))
}

fn build_lattice(
    g: &mut RigGraph,
    bounds: &BoundingBox,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<LatticeRig> {
    let cfg = &config.lattice;
    let n = cfg.name.as_str();
    log::info!("lattice '{n}': corners and tiers");
    let corners = lattice_corners(bounds);
    let extents = bounds.extents();
    let size = extents.x.max(extents.z) * 0.6 * cfg.control_scale;

    let group = g.add_node(format!("{n}_grp"), NodeKind::Group, Mat4::IDENTITY);
    let lattice = g.add_node(
        format!("{n}_lattice"),
        NodeKind::Lattice,
        Mat4::from_translation(bounds.center()),
    );
    g.set_parent(lattice, group)?;
    g.set_visible(lattice, false)?;
    g.add_lattice(LatticeSpec {
        node: lattice,
        divisions: LATTICE_DIVISIONS,
        bounds: *bounds,
    })?;

    let roles = [
        ControlRole::LatticeLower,
        ControlRole::LatticeMiddle,
        ControlRole::LatticeUpper,
    ];
    let mut tiers = Vec::with_capacity(3);
    for (k, role) in roles.into_iter().enumerate() {
        let at = center(&corners[k * 4..k * 4 + 4])?;
        tiers.push(add_control(
            g,
            library,
            Some(group),
            &ControlSpec {
                name: format!("{n}_{}", role.label()),
                role,
                world: Mat4::from_translation(at),
                shape: &cfg.tier_shape,
                size,
                color: None,
            },
        )?);
    }
    let tiers = [tiers[0], tiers[1], tiers[2]];
    let [lower, middle, upper] = tiers;

    let bulge = g.add_node(
        format!("{n}_middle_bulge"),
        NodeKind::Srt,
        g.node(middle.ctl)?.world,
    );
    g.set_parent(bulge, middle.ctl)?;

    let mut joints = Vec::with_capacity(corners.len());
    for (i, corner) in corners.iter().enumerate() {
        let joint = g.add_node(
            format!("{n}_corner_{i}"),
            NodeKind::Joint,
            Mat4::from_translation(*corner),
        );
        let parent = match i / 4 {
            0 => lower.ctl,
            1 => bulge,
            _ => upper.ctl,
        };
        g.set_parent(joint, parent)?;
        g.set_visible(joint, false)?;
        joints.push(joint);
    }
    g.add_skin(SkinBinding {
        name: format!("{n}_skin"),
        deformer: lattice,
        influences: joints.clone(),
        points: joints.iter().map(|j| InfluenceSet::single(*j)).collect(),
        bind_pre: Vec::new(),
    })?;

    log::info!("lattice '{n}': middle follow and bulge");
    let follow = BindPlan::from_influences(
        0,
        &InfluenceSet::new(vec![
            Influence {
                node: lower.ctl,
                weight: 0.5,
            },
            Influence {
                node: upper.ctl,
                weight: 0.5,
            },
        ]),
    )?;
    g.add_blend_edge(
        middle.srt,
        Channel::Translate,
        follow.sources(),
        BlendMode::WeightedAverage,
    )?;

    let attrs = &config.attributes;
    let max_stretch = g.add_attr(upper.ctl, MAX_STRETCH, AttrSpec::at_least(attrs.max_stretch, 1.0))?;
    let max_squash = g.add_attr(upper.ctl, MAX_SQUASH, AttrSpec::range(attrs.max_squash, 0.0, 1.0))?;
    let reference = g.node(lower.ctl)?.position().distance(g.node(middle.srt)?.position())
        + g.node(middle.srt)?.position().distance(g.node(upper.ctl)?.position());
    let bulge_driver = StretchDriver {
        reference_length: reference,
        points: [lower.ctl, middle.srt, upper.ctl],
        max_stretch,
        max_squash,
    };
    // Volume preservation: the sides shrink as the lattice stretches.
    g.add_driver(ScalarDriver {
        name: format!("{n}_bulge"),
        expr: ScalarExpr::div(ScalarExpr::constant(1.0), bulge_driver.to_expr()),
        outputs: [Axis::X, Axis::Z]
            .into_iter()
            .map(|a| AttrRef::new(bulge, a.scale_attr()))
            .collect(),
    })?;

    Ok(LatticeRig {
        group,
        lattice,
        tiers,
        joints,
        bulge,
        bulge_driver,
    })
}

/// Ribbon controls by role.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RibbonControls {
    pub start: ControlRig,
    pub start_tangent: ControlRig,
    pub mid: ControlRig,
    pub end_tangent: ControlRig,
    pub end: ControlRig,
}

impl RibbonControls {
    /// Control driving each of the 7 bezier points.
    pub fn point_drivers(&self) -> [NodeId; 7] {
        [
            self.start.ctl,
            self.start.ctl,
            self.start_tangent.ctl,
            self.mid.ctl,
            self.end_tangent.ctl,
            self.end.ctl,
            self.end.ctl,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RibbonRig {
    pub group: NodeId,
    pub points: [Vec3; 7],
    pub controls: RibbonControls,
    pub tangent: NodeId,
    /// Rail at `-width/2`, center, rail at `+width/2`.
    pub curves: [NodeId; 3],
    pub surface: NodeId,
    /// Rail offset direction and distance from the center curve.
    pub side: Vec3,
    pub half_width: f32,
    pub pins: Vec<NodeId>,
    pub pin_joints: Vec<NodeId>,
}

impl RibbonRig {
    /// Bind-pose shape of the lofted surface.
    pub fn surface_shape(&self) -> Result<BezierRibbonSurface, GeometryError> {
        BezierRibbonSurface::from_center(self.points, self.side, self.half_width)
    }
}

/// Bezier ribbon through the start, middle and end joints of the chain at `root`.
pub fn compile_ribbon(
    graph: &mut RigGraph,
    hierarchy: &JointHierarchy,
    root: JointId,
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<RibbonRig> {
    let root_name = hierarchy.get(root)?.name.clone();
    let chain = hierarchy.chain_from(root)?;
    if chain.len() < 3 {
        return Err(StructuralError::InsufficientChainLength {
            root: root_name,
            found: chain.len(),
            required: 3,
        }
        .into());
    }
    let picked = [chain[0], chain[chain.len() / 2], chain[chain.len() - 1]];
    let p = hierarchy.positions(&picked)?;
    let points = bezier_control_points([p[0], p[1], p[2]]).stage("ribbon points", &root_name)?;
    let name = config.ribbon.name.as_str();
    commit(graph, |g| build_ribbon(g, points, library, config).stage("ribbon", name))
}

fn build_ribbon(
    g: &mut RigGraph,
    points: [Vec3; 7],
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<RibbonRig> {
    let cfg = &config.ribbon;
    let attrs = &config.attributes;
    let n = cfg.name.as_str();
    let axes = cfg.axes;
    log::info!("ribbon '{n}': controls");

    let (start, mid, end) = (points[0], points[3], points[6]);
    let chord = aim_frame(start, end, axes.up.unit(), axes.primary, axes.secondary)?;
    let side = chord.col(axes.secondary.index()).truncate();
    let oriented = |at: Vec3| Mat4::from_translation(at - start) * chord;
    let size = start.distance(end) * 0.15 * cfg.control_scale;

    let group = g.add_node(format!("{n}_grp"), NodeKind::Group, Mat4::IDENTITY);
    let control = |g: &mut RigGraph, role: ControlRole, at: Vec3, parent: NodeId| {
        add_control(
            g,
            library,
            Some(parent),
            &ControlSpec {
                name: format!("{n}_{}", role.label()),
                role,
                world: oriented(at),
                shape: &cfg.pin_shape,
                size,
                color: None,
            },
        )
    };
    let start_ctl = control(g, ControlRole::RibbonStart, start, group)?;
    let mid_ctl = control(g, ControlRole::RibbonMid, mid, group)?;
    let end_ctl = control(g, ControlRole::RibbonEnd, end, group)?;

    let tangent = g.add_node(format!("{n}_mid_tangent"), NodeKind::Srt, oriented(mid));
    g.set_parent(tangent, mid_ctl.ctl)?;
    let controls = RibbonControls {
        start: start_ctl,
        start_tangent: control(g, ControlRole::RibbonStartTangent, points[2], tangent)?,
        mid: mid_ctl,
        end_tangent: control(g, ControlRole::RibbonEndTangent, points[4], tangent)?,
        end: end_ctl,
    };

    // Segment orientations ride on the end controls.
    let orient_a = g.add_node(
        format!("{n}_orient_a"),
        NodeKind::Locator,
        Mat4::from_translation(mid - start) * aim_frame(start, mid, side, axes.primary, axes.secondary)?,
    );
    let orient_b = g.add_node(
        format!("{n}_orient_b"),
        NodeKind::Locator,
        aim_frame(mid, end, side, axes.primary, axes.secondary)?,
    );
    g.set_parent(orient_a, controls.start.ctl)?;
    g.set_parent(orient_b, controls.end.ctl)?;
    g.set_visible(orient_a, false)?;
    g.set_visible(orient_b, false)?;

    log::info!("ribbon '{n}': curves and surface");
    let half = cfg.width * 0.5;
    let drivers = controls.point_drivers();
    let mut curves = [NodeId(0); 3];
    for (slot, (suffix, offset)) in [("crv_a", -half), ("crv", 0.0), ("crv_b", half)]
        .into_iter()
        .enumerate()
    {
        let curve = g.add_node(format!("{n}_{suffix}"), NodeKind::Curve, Mat4::IDENTITY);
        g.set_parent(curve, group)?;
        g.set_visible(curve, false)?;
        let mut cvs = Vec::with_capacity(points.len());
        for (point, driver) in points.iter().zip(drivers) {
            let world = *point + side * offset;
            let local = g.node(driver)?.world.inverse().transform_point3(world);
            cvs.push(CurveCv {
                driver,
                offset: local,
            });
        }
        g.add_curve(CurveSpec {
            node: curve,
            degree: 3,
            cvs,
        })?;
        curves[slot] = curve;
    }
    let surface_node = g.add_node(format!("{n}_surface"), NodeKind::Surface, Mat4::IDENTITY);
    g.set_parent(surface_node, group)?;
    g.add_loft(LoftSpec {
        surface: surface_node,
        curves: curves.to_vec(),
    })?;

    log::info!("ribbon '{n}': tangent blend and roundness");
    let roundness = g.add_attr(controls.mid.ctl, ROUNDNESS, AttrSpec::range(attrs.roundness, 0.0, 2.0))?;
    let round_tangent = g.add_attr(
        controls.mid.ctl,
        ROUND_TANGENT,
        AttrSpec::range(attrs.round_tangent, 0.0, 1.0),
    )?;
    let blend = WeightExpr::Attr(round_tangent);
    g.add_blend_edge(
        tangent,
        Channel::Rotate,
        vec![
            BlendSource::new(orient_a, blend.clone().reverse()),
            BlendSource::new(orient_b, blend),
        ],
        BlendMode::WeightedAverage,
    )?;
    g.add_driver(ScalarDriver {
        name: format!("{n}_roundness"),
        expr: ScalarExpr::Attr { attr: roundness },
        outputs: vec![AttrRef::new(tangent, axes.primary.scale_attr())],
    })?;

    log::info!("ribbon '{n}': pins");
    let surface = BezierRibbonSurface::from_center(points, side, half)?;
    let placements = distribute_pins(&surface, cfg.pin_count)?;
    let (u_lo, u_hi) = surface.u_range();
    let (v_lo, v_hi) = surface.v_range();
    let mut pins = Vec::with_capacity(placements.len());
    let mut pin_joints = Vec::with_capacity(placements.len());
    for (i, placement) in placements.iter().enumerate() {
        let pin = g.add_node(format!("{n}_surface_pin_{i}"), NodeKind::Pin, placement.frame);
        g.set_parent(pin, group)?;
        g.add_attr(pin, PARAMETER_U, AttrSpec::range(placement.u, u_lo, u_hi))?;
        g.add_attr(pin, PARAMETER_V, AttrSpec::range(placement.v, v_lo, v_hi))?;
        g.add_pin(PinAttachment {
            pin,
            surface: surface_node,
        })?;
        let joint = g.add_node(format!("{n}_pin_{i}_bnd"), NodeKind::Joint, placement.frame);
        g.set_parent(joint, pin)?;
        pins.push(pin);
        pin_joints.push(joint);
    }

    Ok(RibbonRig {
        group,
        points,
        controls,
        tangent,
        curves,
        surface: surface_node,
        side,
        half_width: half,
        pins,
        pin_joints,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinGridRig {
    pub group: NodeId,
    /// u-major: pin `(u, v)` is at `u * v_count + v`.
    pub pins: Vec<NodeId>,
    pub joints: Vec<NodeId>,
}

/// Regular grid of pins, each carrying a bind joint, riding on `surface_node` whose
/// shape is `surface`.
pub fn compile_pin_grid(
    graph: &mut RigGraph,
    surface_node: NodeId,
    surface: &dyn Surface,
    config: &CompilerConfig,
) -> CompileResult<PinGridRig> {
    let cfg = &config.pin_grid;
    let name = graph.node(surface_node)?.name.clone();
    let (u_lo, u_hi) = surface.u_range();
    let (v_lo, v_hi) = surface.v_range();
    let placements = distribute_pin_grid(
        surface,
        cfg.u_range.unwrap_or([u_lo, u_hi]),
        cfg.v_range.unwrap_or([v_lo, v_hi]),
        cfg.u_count,
        cfg.v_count,
    )
    .stage("pin grid", &name)?;

    commit(graph, |g| {
        log::info!("pin grid '{name}': {} x {} pins", cfg.u_count, cfg.v_count);
        let group = g.add_node(format!("{name}_pins"), NodeKind::Group, Mat4::IDENTITY);
        let mut pins = Vec::with_capacity(placements.len());
        let mut joints = Vec::with_capacity(placements.len());
        for (i, placement) in placements.iter().enumerate() {
            let (u, v) = (i / cfg.v_count, i % cfg.v_count);
            let pin = g.add_node(format!("{name}_{u}_{v}_grp"), NodeKind::Pin, placement.frame);
            g.set_parent(pin, group)?;
            g.add_attr(pin, PARAMETER_U, AttrSpec::range(placement.u, u_lo, u_hi))?;
            g.add_attr(pin, PARAMETER_V, AttrSpec::range(placement.v, v_lo, v_hi))?;
            g.add_pin(PinAttachment {
                pin,
                surface: surface_node,
            })?;
            let pin_name = g.node(pin)?.name.clone();
            let joint = g.add_node(format!("{pin_name}_bnd"), NodeKind::Joint, placement.frame);
            g.set_parent(joint, pin)?;
            pins.push(pin);
            joints.push(joint);
        }
        Ok(PinGridRig { group, pins, joints })
    })
}
