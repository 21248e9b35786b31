//! Pure geometric helpers used to derive placements during compilation.
//!
//! Nothing in here touches the graph. Every function is deterministic and either returns a
//! value or a [`GeometryError`] describing the degenerate input.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Lengths below this are treated as zero.
pub const LENGTH_EPSILON: f32 = 1e-6;

/// Bisectors shorter than this mean the chain is (anti-)parallel.
pub const COLLINEAR_EPSILON: f32 = 1e-4;

/// Local axis label used by the axis conventions of a rig.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    #[inline]
    pub fn from_index(index: usize) -> Axis {
        match index % 3 {
            0 => Axis::X,
            1 => Axis::Y,
            _ => Axis::Z,
        }
    }

    #[inline]
    pub fn next(self) -> Axis {
        Axis::from_index(self.index() + 1)
    }

    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }

    pub fn label(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }

    /// Name of the scale attribute along this axis (`scaleX`, ...).
    pub fn scale_attr(self) -> &'static str {
        match self {
            Axis::X => "scaleX",
            Axis::Y => "scaleY",
            Axis::Z => "scaleZ",
        }
    }

    pub fn translate_attr(self) -> &'static str {
        match self {
            Axis::X => "translateX",
            Axis::Y => "translateY",
            Axis::Z => "translateZ",
        }
    }

    /// The axis that is neither `self` nor `other`. Falls back to `self.next()` when equal.
    pub fn third(self, other: Axis) -> Axis {
        if self == other {
            return self.next();
        }
        Axis::from_index(3 - self.index() - other.index())
    }
}

/// Axis-aligned world bounding box.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        BoundingBox {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// The `[-1, 1]^3` box control shapes are authored in.
    pub fn unit() -> Self {
        BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    }

    pub fn from_points(points: &[Vec3]) -> Result<Self, GeometryError> {
        let first = *points.first().ok_or(GeometryError::NoPoints)?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        Ok(BoundingBox { min, max })
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

#[inline]
pub fn distance(a: Vec3, b: Vec3) -> f32 {
    a.distance(b)
}

/// Sum of the distances between consecutive points.
pub fn chain_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Per-axis scale that makes `to` (currently scaled by `to_scale`) match the extents of
/// `from`. Used to auto-size control shapes against geometry.
pub fn bounding_box_scale(
    to: &BoundingBox,
    to_scale: Vec3,
    from: &BoundingBox,
) -> Result<Vec3, GeometryError> {
    let to_ext = to.extents();
    let from_ext = from.extents();
    let mut out = Vec3::ZERO;
    for i in 0..3 {
        if to_ext[i].abs() <= f32::EPSILON {
            return Err(GeometryError::DegenerateBounds {
                axis: Axis::from_index(i).label(),
            });
        }
        out[i] = to_scale[i] * (from_ext[i] / to_ext[i]);
    }
    Ok(out)
}

fn segment_lengths(chain: &[Vec3; 3]) -> Result<(f32, f32), GeometryError> {
    let l1 = chain[0].distance(chain[1]);
    if l1 < LENGTH_EPSILON {
        return Err(GeometryError::ZeroLengthSegment { index: 0 });
    }
    let l2 = chain[1].distance(chain[2]);
    if l2 < LENGTH_EPSILON {
        return Err(GeometryError::ZeroLengthSegment { index: 1 });
    }
    Ok((l1, l2))
}

/// Pole position for a 2-bone chain `[upper, middle, lower]`.
///
/// The point sits on the bisector of the two normalized directions pointing into the
/// middle joint, at `average segment length * distance_factor` from it. Collinear chains
/// have no bisector and return [`GeometryError::CollinearChain`].
pub fn pole_vector_position(chain: [Vec3; 3], distance_factor: f32) -> Result<Vec3, GeometryError> {
    let (l1, l2) = segment_lengths(&chain)?;
    let [upper, middle, lower] = chain;
    let into_mid_from_upper = (middle - upper) / l1;
    let into_mid_from_lower = (middle - lower) / l2;
    let bisector = into_mid_from_upper + into_mid_from_lower;
    if bisector.length() < COLLINEAR_EPSILON {
        return Err(GeometryError::CollinearChain);
    }
    let reach = (l1 + l2) * 0.5 * distance_factor;
    Ok(middle + bisector.normalize() * reach)
}

/// [`pole_vector_position`] that offsets along `up` (projected off the chain direction)
/// when the chain is collinear.
pub fn pole_vector_position_with_fallback(
    chain: [Vec3; 3],
    distance_factor: f32,
    up: Vec3,
) -> Result<Vec3, GeometryError> {
    match pole_vector_position(chain, distance_factor) {
        Err(GeometryError::CollinearChain) => {
            let (l1, l2) = segment_lengths(&chain)?;
            let dir = (chain[2] - chain[0]).normalize();
            let mut offset = up - dir * up.dot(dir);
            if offset.length() < LENGTH_EPSILON {
                offset = dir.any_orthonormal_vector();
            }
            log::warn!("collinear chain, pole offset along fallback up vector {offset:?}");
            Ok(chain[1] + offset.normalize() * ((l1 + l2) * 0.5 * distance_factor))
        }
        other => other,
    }
}

/// Seven control points of a two-span cubic bezier through a 3-joint chain:
/// start, start, mid(start, middle), middle, mid(middle, end), end, end.
pub fn bezier_control_points(chain: [Vec3; 3]) -> Result<[Vec3; 7], GeometryError> {
    segment_lengths(&chain)?;
    let [start, middle, end] = chain;
    Ok([
        start,
        start,
        (start + middle) * 0.5,
        middle,
        (middle + end) * 0.5,
        end,
        end,
    ])
}

/// Twelve corners of a 2x3x2 lattice over `bbox`: bottom, mid-height and top tiers of four,
/// each enumerated (xmin, zmin), (xmin, zmax), (xmax, zmin), (xmax, zmax).
///
/// Callers slice `[0..4]`, `[4..8]` and `[8..12]` to get the tiers.
pub fn lattice_corners(bbox: &BoundingBox) -> [Vec3; 12] {
    let (lo, hi) = (bbox.min, bbox.max);
    let mid_y = (lo.y + hi.y) * 0.5;
    let mut out = [Vec3::ZERO; 12];
    for (tier, y) in [lo.y, mid_y, hi.y].into_iter().enumerate() {
        out[tier * 4] = Vec3::new(lo.x, y, lo.z);
        out[tier * 4 + 1] = Vec3::new(lo.x, y, hi.z);
        out[tier * 4 + 2] = Vec3::new(hi.x, y, lo.z);
        out[tier * 4 + 3] = Vec3::new(hi.x, y, hi.z);
    }
    out
}

/// Weighted average of `points`. Weights are normalized by their sum.
pub fn weighted_center(points: &[Vec3], weights: &[f32]) -> Result<Vec3, GeometryError> {
    if points.is_empty() {
        return Err(GeometryError::NoPoints);
    }
    let total: f32 = weights.iter().take(points.len()).sum();
    if total.abs() <= f32::EPSILON {
        return Err(GeometryError::ZeroTotalWeight);
    }
    let sum = points
        .iter()
        .zip(weights.iter())
        .fold(Vec3::ZERO, |acc, (p, w)| acc + *p * *w);
    Ok(sum / total)
}

/// Unweighted centroid.
pub fn center(points: &[Vec3]) -> Result<Vec3, GeometryError> {
    weighted_center(points, &vec![1.0; points.len()])
}

/// World frame at `origin` whose `primary` axis aims at `target` and whose `secondary` axis
/// points as close to `up` as possible. The third axis completes a right-handed basis.
pub fn aim_frame(
    origin: Vec3,
    target: Vec3,
    up: Vec3,
    primary: Axis,
    secondary: Axis,
) -> Result<Mat4, GeometryError> {
    let aim = target - origin;
    if aim.length() < LENGTH_EPSILON {
        return Err(GeometryError::ZeroLengthSegment { index: 0 });
    }
    let aim = aim.normalize();
    let mut side = up - aim * up.dot(aim);
    if side.length() < LENGTH_EPSILON {
        side = aim.any_orthonormal_vector();
    }
    let side = side.normalize();

    let secondary = if secondary == primary { primary.next() } else { secondary };
    let third = primary.third(secondary);
    let mut cols = [Vec3::ZERO; 3];
    cols[primary.index()] = aim;
    cols[secondary.index()] = side;
    let t = third.index();
    cols[t] = cols[(t + 1) % 3].cross(cols[(t + 2) % 3]);

    Ok(Mat4::from_cols(
        cols[0].extend(0.0),
        cols[1].extend(0.0),
        cols[2].extend(0.0),
        origin.extend(1.0),
    ))
}

/// Frame at `position` with Y along `normal`, X = normal × worldY and Z = X × Y.
/// Normals parallel to world Y use world Z for the cross product instead.
pub fn orient_along_normal(position: Vec3, normal: Vec3) -> Result<Mat4, GeometryError> {
    if normal.length() < LENGTH_EPSILON {
        return Err(GeometryError::ZeroNormal);
    }
    let y_axis = normal.normalize();
    let mut x_axis = y_axis.cross(Vec3::Y);
    if x_axis.length() < LENGTH_EPSILON {
        x_axis = y_axis.cross(Vec3::Z);
    }
    let x_axis = x_axis.normalize();
    let z_axis = x_axis.cross(y_axis);
    Ok(Mat4::from_cols(
        x_axis.extend(0.0),
        y_axis.extend(0.0),
        z_axis.extend(0.0),
        position.extend(1.0),
    ))
}
