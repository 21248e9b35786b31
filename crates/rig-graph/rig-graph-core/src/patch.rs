//! Parametric surfaces used to place pins on a lofted ribbon.

use glam::{Mat4, Vec3};

use crate::error::{CompileResult, GeometryError, StructuralError};
use crate::geometry::LENGTH_EPSILON;

pub trait Surface {
    fn u_range(&self) -> (f32, f32);
    fn v_range(&self) -> (f32, f32);
    fn position(&self, u: f32, v: f32) -> Vec3;
    /// Partial derivatives `(dP/du, dP/dv)`.
    fn partials(&self, u: f32, v: f32) -> (Vec3, Vec3);
}

/// Two-span cubic bezier rails (7 control points each) lofted piecewise-linearly in v.
///
/// `u` runs over `[0, 2]`, one unit per span. `v` runs over `[0, 1]` from the first rail to
/// the last.
#[derive(Clone, Debug, PartialEq)]
pub struct BezierRibbonSurface {
    rails: Vec<[Vec3; 7]>,
}

impl BezierRibbonSurface {
    pub fn new(rails: Vec<[Vec3; 7]>) -> Result<Self, GeometryError> {
        if rails.len() < 2 {
            return Err(GeometryError::NoPoints);
        }
        Ok(BezierRibbonSurface { rails })
    }

    /// Center curve offset by `±half_width` along `side`.
    pub fn from_center(center: [Vec3; 7], side: Vec3, half_width: f32) -> Result<Self, GeometryError> {
        let offset = side.normalize_or_zero() * half_width;
        if offset.length() < LENGTH_EPSILON {
            return Err(GeometryError::ZeroNormal);
        }
        Self::new(vec![center.map(|p| p - offset), center, center.map(|p| p + offset)])
    }

    pub fn rails(&self) -> &[[Vec3; 7]] {
        &self.rails
    }

    fn span(u: f32) -> (usize, f32) {
        let u = u.clamp(0.0, 2.0);
        let span = (u.floor() as usize).min(1);
        (span, u - span as f32)
    }

    fn rail_point(rail: &[Vec3; 7], u: f32) -> Vec3 {
        let (span, s) = Self::span(u);
        let p = &rail[span * 3..span * 3 + 4];
        let r = 1.0 - s;
        p[0] * (r * r * r) + p[1] * (3.0 * r * r * s) + p[2] * (3.0 * r * s * s) + p[3] * (s * s * s)
    }

    fn rail_tangent(rail: &[Vec3; 7], u: f32) -> Vec3 {
        let (span, s) = Self::span(u);
        let p = &rail[span * 3..span * 3 + 4];
        let r = 1.0 - s;
        (p[1] - p[0]) * (3.0 * r * r) + (p[2] - p[1]) * (6.0 * r * s) + (p[3] - p[2]) * (3.0 * s * s)
    }

    fn rail_segment(&self, v: f32) -> (usize, f32) {
        let segments = (self.rails.len() - 1) as f32;
        let x = v.clamp(0.0, 1.0) * segments;
        let k = (x.floor() as usize).min(self.rails.len() - 2);
        (k, x - k as f32)
    }
}

impl Surface for BezierRibbonSurface {
    fn u_range(&self) -> (f32, f32) {
        (0.0, 2.0)
    }

    fn v_range(&self) -> (f32, f32) {
        (0.0, 1.0)
    }

    fn position(&self, u: f32, v: f32) -> Vec3 {
        let (k, t) = self.rail_segment(v);
        let a = Self::rail_point(&self.rails[k], u);
        let b = Self::rail_point(&self.rails[k + 1], u);
        a.lerp(b, t)
    }

    fn partials(&self, u: f32, v: f32) -> (Vec3, Vec3) {
        let (k, t) = self.rail_segment(v);
        let du = Self::rail_tangent(&self.rails[k], u).lerp(Self::rail_tangent(&self.rails[k + 1], u), t);
        let segments = (self.rails.len() - 1) as f32;
        let dv = (Self::rail_point(&self.rails[k + 1], u) - Self::rail_point(&self.rails[k], u)) * segments;
        (du, dv)
    }
}

/// Tangent along u, falling back to a secant where the derivative vanishes (doubled
/// end control points).
fn tangent_u(surface: &dyn Surface, u: f32, v: f32) -> Vec3 {
    let (du, _) = surface.partials(u, v);
    if du.length() >= LENGTH_EPSILON {
        return du;
    }
    let (lo, hi) = surface.u_range();
    let h = (hi - lo) * 1e-3;
    let a = (u - h).max(lo);
    let b = (u + h).min(hi);
    surface.position(b, v) - surface.position(a, v)
}

/// Frame of a point riding on `surface`: x = tangent-U, y = normal, z = tangent-V
/// (re-orthogonalized), translation = position.
pub fn pin_frame(surface: &dyn Surface, u: f32, v: f32) -> Result<Mat4, GeometryError> {
    let tu = tangent_u(surface, u, v);
    let (_, tv) = surface.partials(u, v);
    if tu.length() < LENGTH_EPSILON {
        return Err(GeometryError::ZeroLengthSegment { index: 0 });
    }
    let normal = tv.cross(tu);
    if normal.length() < LENGTH_EPSILON {
        return Err(GeometryError::ZeroNormal);
    }
    let x = tu.normalize();
    let y = normal.normalize();
    let z = x.cross(y);
    Ok(Mat4::from_cols(
        x.extend(0.0),
        y.extend(0.0),
        z.extend(0.0),
        surface.position(u, v).extend(1.0),
    ))
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PinPlacement {
    pub u: f32,
    pub v: f32,
    pub frame: Mat4,
}

/// `count` pins evenly spaced in u (`u_i = i / (count - 1) * max_u`) at mid-range v.
pub fn distribute_pins(surface: &dyn Surface, count: usize) -> CompileResult<Vec<PinPlacement>> {
    if count < 2 {
        return Err(StructuralError::InsufficientPinCount(count).into());
    }
    let (u_lo, u_hi) = surface.u_range();
    let (v_lo, v_hi) = surface.v_range();
    let v = (v_lo + v_hi) * 0.5;
    (0..count)
        .map(|i| {
            let u = u_lo + i as f32 / (count - 1) as f32 * (u_hi - u_lo);
            let frame = pin_frame(surface, u, v)?;
            Ok(PinPlacement { u, v, frame })
        })
        .collect()
}

/// Evenly spaced parameters over `range`. A single pin sits at the range start.
fn grid_steps(range: [f32; 2], count: usize) -> impl Iterator<Item = f32> {
    let step = if count > 1 {
        (range[1] - range[0]) / (count - 1) as f32
    } else {
        0.0
    };
    (0..count).map(move |i| range[0] + i as f32 * step)
}

/// `u_count x v_count` pins over the given parameter ranges, u-major: all v positions of
/// the first u column come first.
pub fn distribute_pin_grid(
    surface: &dyn Surface,
    u_range: [f32; 2],
    v_range: [f32; 2],
    u_count: usize,
    v_count: usize,
) -> CompileResult<Vec<PinPlacement>> {
    if u_count == 0 || v_count == 0 {
        return Err(StructuralError::EmptyPinGrid {
            u: u_count,
            v: v_count,
        }
        .into());
    }
    let mut pins = Vec::with_capacity(u_count * v_count);
    for u in grid_steps(u_range, u_count) {
        for v in grid_steps(v_range, v_count) {
            let frame = pin_frame(surface, u, v)?;
            pins.push(PinPlacement { u, v, frame });
        }
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::geometry::bezier_control_points;

    fn straight() -> BezierRibbonSurface {
        let center = bezier_control_points([Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0)])
            .unwrap();
        BezierRibbonSurface::from_center(center, Vec3::Z, 0.5).unwrap()
    }

    #[test]
    fn surface_interpolates_rails() {
        let s = straight();
        assert!(s.position(0.0, 0.5).distance(Vec3::ZERO) < 1e-6);
        assert!(s.position(1.0, 0.5).distance(Vec3::new(2.0, 0.0, 0.0)) < 1e-6);
        assert!(s.position(2.0, 0.5).distance(Vec3::new(4.0, 0.0, 0.0)) < 1e-6);
        assert!(s.position(2.0, 0.0).distance(Vec3::new(4.0, 0.0, -0.5)) < 1e-6);
        assert!(s.position(0.0, 1.0).distance(Vec3::new(0.0, 0.0, 0.5)) < 1e-6);
    }

    #[test]
    fn pins_are_even_in_u_and_centered_in_v() {
        let s = straight();
        let pins = distribute_pins(&s, 5).unwrap();
        let us: Vec<f32> = pins.iter().map(|p| p.u).collect();
        assert_eq!(us, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert!(pins.iter().all(|p| p.v == 0.5));
        for p in &pins {
            let x = p.frame.x_axis.truncate();
            let y = p.frame.y_axis.truncate();
            let z = p.frame.z_axis.truncate();
            assert!(x.distance(Vec3::X) < 1e-4, "tangent {x:?}");
            assert!((y.length() - 1.0).abs() < 1e-5);
            assert!(x.dot(y).abs() < 1e-5 && y.dot(z).abs() < 1e-5);
            assert!(x.cross(y).distance(z) < 1e-5);
        }
    }

    #[test]
    fn grid_is_u_major() {
        let s = straight();
        let pins = distribute_pin_grid(&s, [0.0, 2.0], [0.0, 1.0], 3, 5).unwrap();
        assert_eq!(pins.len(), 15);
        let uv: Vec<(f32, f32)> = pins.iter().map(|p| (p.u, p.v)).collect();
        assert_eq!(&uv[..6], &[(0.0, 0.0), (0.0, 0.25), (0.0, 0.5), (0.0, 0.75), (0.0, 1.0), (1.0, 0.0)]);
        assert_eq!(uv[14], (2.0, 1.0));
        // straight ribbon along X with rails at z = -0.5 and z = +0.5
        assert!(pins[7].frame.w_axis.truncate().distance(Vec3::new(2.0, 0.0, 0.0)) < 1e-5);
        assert!(pins[5].frame.w_axis.truncate().distance(Vec3::new(2.0, 0.0, -0.5)) < 1e-5);
    }

    #[test]
    fn single_pin_sits_at_range_start() {
        let pins = distribute_pin_grid(&straight(), [0.5, 1.5], [0.25, 0.75], 1, 2).unwrap();
        let uv: Vec<(f32, f32)> = pins.iter().map(|p| (p.u, p.v)).collect();
        assert_eq!(uv, vec![(0.5, 0.25), (0.5, 0.75)]);

        let err = distribute_pin_grid(&straight(), [0.0, 1.0], [0.0, 1.0], 0, 3).unwrap_err();
        assert_eq!(err, CompileError::from(StructuralError::EmptyPinGrid { u: 0, v: 3 }));
    }

    #[test]
    fn too_few_pins() {
        let err = distribute_pins(&straight(), 1).unwrap_err();
        assert_eq!(err, CompileError::from(StructuralError::InsufficientPinCount(1)));
    }
}
