//! Control-shape library: named curve point sets keyed by shape id.
//!
//! On disk a library is a JSON object mapping each key to a list of curves:
//!
//! ```json
//! { "circle": [ { "name": "circle", "points": [[1, 0, 0], [0, 0, 1], [-1, 0, 0]] } ] }
//! ```

use glam::Vec3;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

use crate::error::ResourceError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeCurve {
    pub name: String,
    pub points: Vec<Vec3>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeLibrary {
    shapes: IndexMap<String, Vec<ShapeCurve>>,
}

fn ring(segments: usize, plane: impl Fn(f32, f32) -> Vec3) -> Vec<Vec3> {
    (0..=segments)
        .map(|i| {
            let a = i as f32 / segments as f32 * TAU;
            plane(a.cos(), a.sin())
        })
        .collect()
}

fn curve(name: &str, points: Vec<Vec3>) -> ShapeCurve {
    ShapeCurve {
        name: name.to_string(),
        points,
    }
}

impl ShapeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit-sized shapes generated in code: `circle`, `sphere`, `box`, `needle`, `gear`.
    pub fn builtin() -> Self {
        let mut lib = ShapeLibrary::new();
        lib.insert("circle", vec![curve("circle", ring(16, |c, s| Vec3::new(0.0, c, s)))]);
        lib.insert(
            "sphere",
            vec![
                curve("ring_x", ring(16, |c, s| Vec3::new(0.0, c, s))),
                curve("ring_y", ring(16, |c, s| Vec3::new(c, 0.0, s))),
                curve("ring_z", ring(16, |c, s| Vec3::new(c, s, 0.0))),
            ],
        );
        let corners = [
            (-1.0, -1.0, -1.0),
            (1.0, -1.0, -1.0),
            (1.0, -1.0, 1.0),
            (-1.0, -1.0, 1.0),
            (-1.0, -1.0, -1.0),
            (-1.0, 1.0, -1.0),
            (1.0, 1.0, -1.0),
            (1.0, -1.0, -1.0),
            (1.0, 1.0, -1.0),
            (1.0, 1.0, 1.0),
            (1.0, -1.0, 1.0),
            (1.0, 1.0, 1.0),
            (-1.0, 1.0, 1.0),
            (-1.0, -1.0, 1.0),
            (-1.0, 1.0, 1.0),
            (-1.0, 1.0, -1.0),
        ];
        lib.insert(
            "box",
            vec![curve(
                "box",
                corners
                    .iter()
                    .map(|(x, y, z)| Vec3::new(*x, *y, *z) * 0.5)
                    .collect(),
            )],
        );
        lib.insert(
            "needle",
            vec![
                curve("shaft", vec![Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0)]),
                curve("head", ring(8, |c, s| Vec3::new(c * 0.15, 1.15 + s * 0.15, 0.0))),
            ],
        );
        let teeth = 8;
        let gear = (0..=teeth * 4)
            .map(|i| {
                let a = i as f32 / (teeth * 4) as f32 * TAU;
                let r = if (i / 2) % 2 == 0 { 1.0 } else { 0.75 };
                Vec3::new(a.cos() * r, 0.0, a.sin() * r)
            })
            .collect();
        lib.insert("gear", vec![curve("gear", gear)]);
        lib
    }

    pub fn from_json(text: &str) -> Result<Self, ResourceError> {
        serde_json::from_str(text).map_err(|e| ResourceError::ShapeParse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ResourceError> {
        serde_json::to_string_pretty(self).map_err(|e| ResourceError::ShapeParse(e.to_string()))
    }

    pub fn insert(&mut self, key: impl Into<String>, curves: Vec<ShapeCurve>) {
        self.shapes.insert(key.into(), curves);
    }

    /// Merge `other` on top of `self`; keys present in both take `other`'s curves.
    pub fn extend(&mut self, other: ShapeLibrary) {
        self.shapes.extend(other.shapes);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shapes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.shapes.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Result<&[ShapeCurve], ResourceError> {
        self.shapes
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| ResourceError::UnknownControlShape(key.to_string()))
    }

    /// Curves of `key` uniformly scaled by `size`.
    pub fn scaled(&self, key: &str, size: f32) -> Result<Vec<ShapeCurve>, ResourceError> {
        Ok(self
            .get(key)?
            .iter()
            .map(|c| curve(&c.name, c.points.iter().map(|p| *p * size).collect()))
            .collect())
    }
}
