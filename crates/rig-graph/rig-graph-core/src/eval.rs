//! Reference evaluator for a compiled [`RigGraph`].
//!
//! Evaluates weights, scalar drivers and world matrices in topological order. IK solves
//! and deformers belong to the host and are not evaluated here; IK joints keep their
//! blended forward transforms.

use glam::{Mat4, Vec3};
use hashbrown::HashMap;

use crate::binder::blend_by_count;
use crate::error::GraphError;
use crate::geometry::Axis;
use crate::graph::{AttrRef, BlendEdge, BlendMode, Channel, RigGraph, ScalarContext};
use crate::ids::NodeId;

/// Animator input: attribute values and local transform overrides.
#[derive(Clone, Debug, Default)]
pub struct EvalContext {
    attrs: HashMap<AttrRef, f32>,
    locals: HashMap<NodeId, Mat4>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attr(&mut self, node: NodeId, attr: impl Into<String>, value: f32) -> &mut Self {
        self.attrs.insert(AttrRef::new(node, attr), value);
        self
    }

    /// Replace a node's local transform (what an animator does when posing a control).
    pub fn set_local(&mut self, node: NodeId, local: Mat4) -> &mut Self {
        self.locals.insert(node, local);
        self
    }

    /// Translate a node's local transform by `offset` relative to its bind local.
    pub fn translate(&mut self, graph: &RigGraph, node: NodeId, offset: Vec3) -> Result<&mut Self, GraphError> {
        let local = graph.node(node)?.local;
        Ok(self.set_local(node, Mat4::from_translation(offset) * local))
    }
}

#[derive(Clone, Debug)]
pub struct Evaluation {
    worlds: Vec<Mat4>,
    driven: HashMap<AttrRef, f32>,
}

impl Evaluation {
    pub fn world(&self, node: NodeId) -> Option<Mat4> {
        self.worlds.get(node.index()).copied()
    }

    pub fn position(&self, node: NodeId) -> Option<Vec3> {
        self.world(node).map(|m| m.w_axis.truncate())
    }

    /// Value written by a scalar driver during this evaluation.
    pub fn driven(&self, node: NodeId, attr: &str) -> Option<f32> {
        self.driven.get(&AttrRef::new(node, attr)).copied()
    }
}

struct Resolver<'a> {
    graph: &'a RigGraph,
    ctx: &'a EvalContext,
    worlds: &'a [Mat4],
    driven: &'a HashMap<AttrRef, f32>,
}

impl ScalarContext for Resolver<'_> {
    fn attr(&self, attr: &AttrRef) -> Result<f32, GraphError> {
        if let Some(v) = self.ctx.attrs.get(attr).or_else(|| self.driven.get(attr)) {
            return Ok(*v);
        }
        let spec = self.graph.attr(attr)?;
        Ok(spec.default)
    }

    fn position(&self, node: NodeId) -> Result<Vec3, GraphError> {
        self.worlds
            .get(node.index())
            .map(|m| m.w_axis.truncate())
            .ok_or(GraphError::UnknownNode(node))
    }
}

/// Overwrite one scale or translate component of `local` with a driven value.
fn drive_local(local: &mut Mat4, attr: &str, value: f32) {
    for axis in [Axis::X, Axis::Y, Axis::Z] {
        if attr == axis.scale_attr() {
            let col = local.col_mut(axis.index());
            let len = col.truncate().length();
            if len > f32::EPSILON {
                *col *= value / len;
            }
            return;
        }
        if attr == axis.translate_attr() {
            local.w_axis[axis.index()] = value;
            return;
        }
    }
}

/// Source motion since bind: `world * bind⁻¹`.
fn delta(graph: &RigGraph, worlds: &[Mat4], node: NodeId) -> Result<Mat4, GraphError> {
    let bind = graph.node(node)?.world;
    Ok(worlds[node.index()] * bind.inverse())
}

fn apply_channel(current: Mat4, result: Mat4, channel: Channel) -> Mat4 {
    match channel {
        Channel::All => result,
        Channel::Translate => {
            let (s, r, _) = current.to_scale_rotation_translation();
            let (_, _, t) = result.to_scale_rotation_translation();
            Mat4::from_scale_rotation_translation(s, r, t)
        }
        Channel::Rotate => {
            let (s, _, t) = current.to_scale_rotation_translation();
            let (_, r, _) = result.to_scale_rotation_translation();
            Mat4::from_scale_rotation_translation(s, r, t)
        }
    }
}

fn apply_edge(
    graph: &RigGraph,
    resolver: &Resolver<'_>,
    edge: &BlendEdge,
    current: Mat4,
) -> Result<Mat4, GraphError> {
    let mut terms = Vec::with_capacity(edge.sources.len());
    for s in &edge.sources {
        let w = s.weight.eval(resolver)?;
        terms.push((delta(graph, resolver.worlds, s.node)?, w));
    }
    let bind = graph.node(edge.target)?.world;
    let result = match edge.mode {
        BlendMode::AdditiveParent => {
            let total: f32 = terms.iter().map(|(_, w)| *w).sum();
            let offset = terms
                .iter()
                .fold(Mat4::IDENTITY * (1.0 - total), |acc, (m, w)| acc + *m * *w);
            offset * current
        }
        BlendMode::WeightedAverage => blend_by_count(&terms).unwrap_or(Mat4::IDENTITY) * bind,
        BlendMode::PoleReverseSwitch => {
            terms.iter().fold(Mat4::ZERO, |acc, (m, w)| acc + *m * *w) * bind
        }
    };
    Ok(apply_channel(current, result, edge.channel))
}

pub fn evaluate(graph: &RigGraph, ctx: &EvalContext) -> Result<Evaluation, GraphError> {
    let order = graph.topological_order()?;
    let mut worlds: Vec<Mat4> = graph.nodes().iter().map(|n| n.world).collect();
    let mut driven: HashMap<AttrRef, f32> = HashMap::new();
    let mut driver_done = vec![false; graph.drivers().len()];

    for id in order {
        let node = graph.node(id)?;

        for (i, driver) in graph.drivers().iter().enumerate() {
            if driver_done[i] || !driver.outputs.iter().any(|o| o.node == id) {
                continue;
            }
            let value = {
                let resolver = Resolver {
                    graph,
                    ctx,
                    worlds: &worlds,
                    driven: &driven,
                };
                driver.expr.eval(&resolver)?
            };
            for out in &driver.outputs {
                driven.insert(out.clone(), value);
            }
            driver_done[i] = true;
        }

        let mut local = ctx.locals.get(&id).copied().unwrap_or(node.local);
        for (attr, value) in driven.iter().filter(|(r, _)| r.node == id) {
            drive_local(&mut local, &attr.attr, *value);
        }

        let mut current = match node.parent {
            Some(p) => worlds[p.index()] * local,
            None => local,
        };

        for edge in graph.edges_for(id) {
            let resolver = Resolver {
                graph,
                ctx,
                worlds: &worlds,
                driven: &driven,
            };
            current = apply_edge(graph, &resolver, edge, current)?;
        }
        worlds[id.index()] = current;
    }

    Ok(Evaluation { worlds, driven })
}
