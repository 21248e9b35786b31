//! Deformation cage: one control per cage vertex, each riding on the vertex's skin
//! influences, with display lines along the mesh edges.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::binder::{BindPlan, InfluenceSet};
use crate::config::CompilerConfig;
use crate::error::{CompileResult, StructuralError};
use crate::geometry::orient_along_normal;
use crate::graph::{
    BlendMode, Channel, ControlRole, ControlShape, CurveCv, CurveSpec, Lock, NodeKind, RigGraph,
    SkinBinding,
};
use crate::ids::NodeId;
use crate::shapes::ShapeLibrary;

use super::{commit, Staged};

/// Low-resolution mesh whose vertices become controls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CageMesh {
    pub name: String,
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Vertex index pairs; either orientation, duplicates allowed.
    pub edges: Vec<[usize; 2]>,
}

impl CageMesh {
    /// Each undirected edge once, in first-seen order.
    pub fn unique_edges(&self) -> Vec<[usize; 2]> {
        let mut out: Vec<[usize; 2]> = Vec::with_capacity(self.edges.len());
        for [a, b] in &self.edges {
            if a == b {
                continue;
            }
            if !out.iter().any(|e| (e[0] == *a && e[1] == *b) || (e[0] == *b && e[1] == *a)) {
                out.push([*a, *b]);
            }
        }
        out
    }

    fn validate(&self, bindings: &[InfluenceSet]) -> Result<(), StructuralError> {
        let mismatch = |found: usize, what: &'static str| StructuralError::CageMismatch {
            mesh: self.name.clone(),
            vertices: self.vertices.len(),
            found,
            what,
        };
        if self.normals.len() != self.vertices.len() {
            return Err(mismatch(self.normals.len(), "normals"));
        }
        if bindings.len() != self.vertices.len() {
            return Err(mismatch(bindings.len(), "influence sets"));
        }
        if let Some(bad) = self
            .edges
            .iter()
            .flatten()
            .find(|i| **i >= self.vertices.len())
        {
            return Err(mismatch(*bad, "as an edge index"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CageVertex {
    pub orig: NodeId,
    pub srt: NodeId,
    pub ctl: NodeId,
    pub bnd: NodeId,
    pub bpm: NodeId,
    pub plan: BindPlan,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CageRig {
    pub group: NodeId,
    pub mesh: NodeId,
    pub vertices: Vec<CageVertex>,
    pub display: NodeId,
    pub lines: Vec<NodeId>,
}

/// Build a cage over `mesh`; `bindings[i]` lists the existing graph nodes that deform
/// vertex `i` and their weights.
pub fn compile_cage(
    graph: &mut RigGraph,
    mesh: &CageMesh,
    bindings: &[InfluenceSet],
    library: &ShapeLibrary,
    config: &CompilerConfig,
) -> CompileResult<CageRig> {
    mesh.validate(bindings)?;
    let cfg = &config.cage;
    library.get(&cfg.control_shape)?;
    let plans = bindings
        .iter()
        .enumerate()
        .map(|(i, set)| BindPlan::from_influences(i, set))
        .collect::<Result<Vec<_>, _>>()
        .stage("cage bindings", &mesh.name)?;

    commit(graph, |g| {
        let m = mesh.name.as_str();
        let group_name = format!("{m}_cage_ctl");
        let group = g.add_node(group_name, NodeKind::Group, Mat4::IDENTITY);
        let mesh_node = g.add_node(m, NodeKind::Mesh, Mat4::IDENTITY);
        g.set_parent(mesh_node, group)?;

        let mut vertices = Vec::with_capacity(mesh.vertices.len());
        for (i, (position, normal)) in mesh.vertices.iter().zip(&mesh.normals).enumerate() {
            let v = format!("{m}_{i}");
            let frame = orient_along_normal(*position, *normal).stage("cage orient", &v)?;
            let rest = Mat4::from_translation(*position);
            let orig = g.add_node(format!("{v}_orig"), NodeKind::Null, rest);
            let srt = g.add_node(format!("{v}_srt"), NodeKind::Srt, frame);
            let ctl = g.add_node(format!("{v}_ctl"), NodeKind::Control, frame);
            let bnd = g.add_node(format!("{v}_bnd"), NodeKind::Joint, frame);
            let bpm = g.add_node(format!("{v}_bpm"), NodeKind::Joint, frame);
            g.set_parent(orig, group)?;
            g.set_parent(srt, orig)?;
            g.set_parent(ctl, srt)?;
            g.set_parent(bnd, ctl)?;
            g.set_parent(bpm, srt)?;
            g.set_visible(bnd, false)?;
            g.set_visible(bpm, false)?;
            g.set_role(ctl, ControlRole::CageVertex(i as u32))?;
            g.set_shape(
                ctl,
                ControlShape {
                    key: cfg.control_shape.clone(),
                    size: cfg.control_size,
                    color: Some(cfg.control_color),
                },
            )?;
            g.lock(ctl, &[Lock::Rotate, Lock::Scale])?;
            vertices.push(CageVertex {
                orig,
                srt,
                ctl,
                bnd,
                bpm,
                plan: plans[i].clone(),
            });
        }
        log::info!("cage '{m}': {} vertex controls", vertices.len());

        let display = g.add_node(format!("{m}_cageDisplay"), NodeKind::Group, Mat4::IDENTITY);
        g.set_parent(display, group)?;
        let mut lines = Vec::new();
        for [a, b] in mesh.unique_edges() {
            let line = g.add_node(format!("cageLine_{a}_{b}"), NodeKind::Curve, Mat4::IDENTITY);
            g.set_parent(line, display)?;
            g.add_curve(CurveSpec {
                node: line,
                degree: 1,
                cvs: vec![
                    CurveCv {
                        driver: vertices[a].ctl,
                        offset: Vec3::ZERO,
                    },
                    CurveCv {
                        driver: vertices[b].ctl,
                        offset: Vec3::ZERO,
                    },
                ],
            })?;
            lines.push(line);
        }
        log::info!("cage '{m}': {} display lines", lines.len());

        for (i, vertex) in vertices.iter().enumerate() {
            g.add_blend_edge(
                vertex.orig,
                Channel::All,
                vertex.plan.sources(),
                BlendMode::WeightedAverage,
            )
            .stage("cage follow", &format!("{m}_{i}_orig"))?;
        }

        g.add_skin(SkinBinding {
            name: format!("{m}_cage_cluster"),
            deformer: mesh_node,
            influences: vertices.iter().map(|v| v.bnd).collect(),
            points: vertices.iter().map(|v| InfluenceSet::single(v.bnd)).collect(),
            bind_pre: vertices.iter().map(|v| v.bpm).collect(),
        })?;

        Ok(CageRig {
            group,
            mesh: mesh_node,
            vertices,
            display,
            lines,
        })
    })
}
