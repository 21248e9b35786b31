//! Multi-influence binding.
//!
//! Decides how a target follows its skin influences:
//! - one influence: plain parent
//! - two influences: single-parameter lerp driven by the second weight
//! - more: weighted sum of the influence matrices, weights used as given

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::ResourceError;
use crate::graph::{BlendSource, WeightExpr};
use crate::ids::NodeId;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Influence {
    pub node: NodeId,
    pub weight: f32,
}

/// Influences of one deformed point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluenceSet {
    pub influences: Vec<Influence>,
}

impl InfluenceSet {
    pub fn new(influences: Vec<Influence>) -> Self {
        InfluenceSet { influences }
    }

    pub fn single(node: NodeId) -> Self {
        InfluenceSet::new(vec![Influence { node, weight: 1.0 }])
    }

    pub fn len(&self) -> usize {
        self.influences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.influences.is_empty()
    }

    pub fn total_weight(&self) -> f32 {
        self.influences.iter().map(|i| i.weight).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BindPlan {
    Parent { node: NodeId },
    Lerp { base: NodeId, target: NodeId, t: f32 },
    WeightedSum { terms: Vec<Influence> },
}

impl BindPlan {
    pub fn from_influences(point: usize, set: &InfluenceSet) -> Result<Self, ResourceError> {
        if let Some(bad) = set.influences.iter().find(|i| i.weight < 0.0) {
            return Err(ResourceError::NegativeWeight {
                point,
                weight: bad.weight,
            });
        }
        Ok(match set.influences.as_slice() {
            [] => return Err(ResourceError::NoInfluence { point }),
            [only] => BindPlan::Parent { node: only.node },
            [base, target] => BindPlan::Lerp {
                base: base.node,
                target: target.node,
                t: target.weight,
            },
            many => {
                let total: f32 = many.iter().map(|i| i.weight).sum();
                if (total - 1.0).abs() > 1e-3 {
                    log::debug!("point {point}: {} influences sum to {total}, kept as-is", many.len());
                }
                BindPlan::WeightedSum {
                    terms: many.to_vec(),
                }
            }
        })
    }

    /// Blend edge sources realizing this plan. The lerp base gets `1 - t` as a reverse
    /// expression so both weights stay tied to one value.
    pub fn sources(&self) -> Vec<BlendSource> {
        match self {
            BindPlan::Parent { node } => vec![BlendSource::new(*node, WeightExpr::constant(1.0))],
            BindPlan::Lerp { base, target, t } => vec![
                BlendSource::new(*base, WeightExpr::constant(*t).reverse()),
                BlendSource::new(*target, WeightExpr::constant(*t)),
            ],
            BindPlan::WeightedSum { terms } => terms
                .iter()
                .map(|i| BlendSource::new(i.node, WeightExpr::constant(i.weight)))
                .collect(),
        }
    }

    pub fn blend(&self, resolve: impl Fn(NodeId) -> Mat4) -> Mat4 {
        match self {
            BindPlan::Parent { node } => resolve(*node),
            BindPlan::Lerp { base, target, t } => lerp_matrix(&resolve(*base), &resolve(*target), *t),
            BindPlan::WeightedSum { terms } => terms
                .iter()
                .fold(Mat4::ZERO, |acc, i| acc + resolve(i.node) * i.weight),
        }
    }
}

/// Componentwise `(1 - t) * a + t * b`. Exact at `t = 0` and `t = 1`.
#[inline]
pub fn lerp_matrix(a: &Mat4, b: &Mat4, t: f32) -> Mat4 {
    *a * (1.0 - t) + *b * t
}

/// Blend already-resolved matrices with the same count rules as [`BindPlan`]: one matrix
/// is returned as-is, two lerp by the second weight, more are summed by weight.
pub fn blend_by_count(terms: &[(Mat4, f32)]) -> Option<Mat4> {
    match terms {
        [] => None,
        [(m, _)] => Some(*m),
        [(a, _), (b, t)] => Some(lerp_matrix(a, b, *t)),
        many => Some(many.iter().fold(Mat4::ZERO, |acc, (m, w)| acc + *m * *w)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn set(weights: &[f32]) -> InfluenceSet {
        InfluenceSet::new(
            weights
                .iter()
                .enumerate()
                .map(|(i, w)| Influence {
                    node: NodeId(i as u32),
                    weight: *w,
                })
                .collect(),
        )
    }

    #[test]
    fn plan_by_influence_count() {
        assert_eq!(
            BindPlan::from_influences(4, &set(&[])),
            Err(ResourceError::NoInfluence { point: 4 })
        );
        assert_eq!(
            BindPlan::from_influences(0, &set(&[1.0])).unwrap(),
            BindPlan::Parent { node: NodeId(0) }
        );
        assert_eq!(
            BindPlan::from_influences(0, &set(&[0.7, 0.3])).unwrap(),
            BindPlan::Lerp {
                base: NodeId(0),
                target: NodeId(1),
                t: 0.3
            }
        );
        assert!(matches!(
            BindPlan::from_influences(0, &set(&[0.5, 0.25, 0.25])).unwrap(),
            BindPlan::WeightedSum { terms } if terms.len() == 3
        ));
        assert_eq!(
            BindPlan::from_influences(2, &set(&[0.5, -0.1])),
            Err(ResourceError::NegativeWeight {
                point: 2,
                weight: -0.1
            })
        );
    }

    #[test]
    fn lerp_endpoints_are_exact() {
        let a = Mat4::from_scale_rotation_translation(
            Vec3::splat(1.3),
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 3.5),
        );
        let b = Mat4::from_rotation_x(1.1) * Mat4::from_translation(Vec3::new(-4.0, 0.25, 9.0));
        assert_eq!(lerp_matrix(&a, &b, 0.0), a);
        assert_eq!(lerp_matrix(&a, &b, 1.0), b);

        let plan = BindPlan::Lerp {
            base: NodeId(0),
            target: NodeId(1),
            t: 1.0,
        };
        let resolved = plan.blend(|n| if n == NodeId(0) { a } else { b });
        assert_eq!(resolved, b);
    }

    #[test]
    fn half_weight_is_the_componentwise_mean() {
        let a = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 0.5),
            Quat::from_rotation_z(0.4),
            Vec3::new(2.0, 0.0, -6.0),
        );
        let b = Mat4::from_rotation_y(-1.2) * Mat4::from_translation(Vec3::new(0.0, 8.0, 1.0));
        let mean = (a + b) * 0.5;
        assert!(lerp_matrix(&a, &b, 0.5).abs_diff_eq(mean, 1e-6));

        let plan = BindPlan::from_influences(0, &set(&[0.5, 0.5])).unwrap();
        let resolved = plan.blend(|n| if n == NodeId(0) { a } else { b });
        assert!(resolved.abs_diff_eq(mean, 1e-6));
        // no re-orthonormalization: the blended basis shrinks
        assert!(resolved.x_axis.truncate().length() < 1.0);
    }

    #[test]
    fn weighted_sum_is_not_renormalized() {
        let plan = BindPlan::from_influences(0, &set(&[0.25, 0.25, 0.25])).unwrap();
        let m = plan.blend(|_| Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)));
        assert!((m.w_axis.x - 3.0).abs() < 1e-6);
        assert!((m.w_axis.w - 0.75).abs() < 1e-6);
    }

    #[test]
    fn lerp_sources_share_the_weight() {
        let plan = BindPlan::from_influences(0, &set(&[0.6, 0.4])).unwrap();
        let sources = plan.sources();
        assert_eq!(sources[0].weight, WeightExpr::constant(0.4).reverse());
        assert_eq!(sources[1].weight, WeightExpr::constant(0.4));
    }

    #[test]
    fn blend_by_count_matches_plan() {
        let a = Mat4::from_translation(Vec3::X);
        let b = Mat4::from_translation(Vec3::Y);
        let plan = BindPlan::Lerp {
            base: NodeId(0),
            target: NodeId(1),
            t: 0.25,
        };
        let via_plan = plan.blend(|n| if n == NodeId(0) { a } else { b });
        assert_eq!(blend_by_count(&[(a, 0.75), (b, 0.25)]), Some(via_plan));
        assert_eq!(blend_by_count(&[]), None);
    }
}
