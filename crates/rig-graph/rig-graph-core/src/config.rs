//! Compiler configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a config file only needs the
//! fields it overrides.

use serde::{Deserialize, Serialize};

use crate::geometry::Axis;

/// Axis conventions of a rig: which local axis aims down the chain, which one points
/// towards the world `up` axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub primary: Axis,
    pub secondary: Axis,
    pub up: Axis,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            primary: Axis::X,
            secondary: Axis::Y,
            up: Axis::Y,
        }
    }
}

/// Defaults for the animator-facing attribute contracts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeDefaults {
    pub ik_fk_switch: f32,
    pub follow_translation: f32,
    pub follow_rotation: f32,
    pub max_stretch: f32,
    pub max_squash: f32,
    pub roundness: f32,
    pub round_tangent: f32,
}

impl Default for AttributeDefaults {
    fn default() -> Self {
        Self {
            ik_fk_switch: 0.0,
            follow_translation: 1.0,
            follow_rotation: 1.0,
            max_stretch: 1.5,
            max_squash: 0.0,
            roundness: 1.0,
            round_tangent: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimbConfig {
    pub prefix: String,
    /// Substring of bind joint names replaced by `_fk`, `_ik`, `_stretch` on duplicates.
    pub bind_pattern: String,
    pub axes: AxisConfig,
    pub control_scale: f32,
    /// Multiplier on the average segment length for the pole control distance.
    pub pole_distance: f32,
    pub fk_shape: String,
    pub ik_shape: String,
    pub pole_shape: String,
    pub root_shape: String,
    pub host_shape: String,
    /// Host control offset from the end joint along the up axis, in control-scale units.
    pub host_offset: f32,
}

impl Default for LimbConfig {
    fn default() -> Self {
        Self {
            prefix: "limb".into(),
            bind_pattern: "_bnd".into(),
            axes: AxisConfig::default(),
            control_scale: 1.0,
            pole_distance: 2.0,
            fk_shape: "circle".into(),
            ik_shape: "box".into(),
            pole_shape: "sphere".into(),
            root_shape: "box".into(),
            host_shape: "gear".into(),
            host_offset: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub name: String,
    pub control_scale: f32,
    pub tier_shape: String,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            name: "lattice".into(),
            control_scale: 1.0,
            tier_shape: "box".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RibbonConfig {
    pub name: String,
    pub axes: AxisConfig,
    /// Distance between the two offset rails.
    pub width: f32,
    pub control_scale: f32,
    pub pin_shape: String,
    /// Number of bind pins distributed along the lofted surface.
    pub pin_count: usize,
}

impl Default for RibbonConfig {
    fn default() -> Self {
        Self {
            name: "ribbon".into(),
            axes: AxisConfig::default(),
            width: 1.0,
            control_scale: 1.0,
            pin_shape: "circle".into(),
            pin_count: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CageConfig {
    pub control_size: f32,
    pub control_shape: String,
    pub control_color: [f32; 3],
}

impl Default for CageConfig {
    fn default() -> Self {
        Self {
            control_size: 1.0,
            control_shape: "sphere".into(),
            control_color: [0.5, 0.5, 0.5],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicRigConfig {
    pub main_shape: String,
    pub local_shape: String,
    /// Main control footprint relative to the geometry width.
    pub main_footprint: f32,
    pub local_scales: [f32; 2],
}

impl Default for BasicRigConfig {
    fn default() -> Self {
        Self {
            main_shape: "circle".into(),
            local_shape: "circle".into(),
            main_footprint: 2.5,
            local_scales: [0.85, 0.7],
        }
    }
}

/// Iris/pupil dilation rig: one joint per edge loop of an X-facing sphere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    pub name: String,
    /// Sphere subdivisions; the rig gets `subdivisions + 1` joints.
    pub subdivisions: usize,
    /// First joint driven by `Pupil`; earlier joints follow `Iris`.
    pub pupil_edge: usize,
    pub iris: f32,
    pub pupil: f32,
    pub control_shape: String,
    pub control_size: f32,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            name: "eye".into(),
            subdivisions: 20,
            pupil_edge: 16,
            iris: 0.5,
            pupil: 0.5,
            control_shape: "circle".into(),
            control_size: 2.0,
        }
    }
}

/// Regular grid of pins over a parameter rectangle of a surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinGridConfig {
    pub u_count: usize,
    pub v_count: usize,
    /// Defaults to the surface's full parameter range.
    pub u_range: Option<[f32; 2]>,
    pub v_range: Option<[f32; 2]>,
}

impl Default for PinGridConfig {
    fn default() -> Self {
        Self {
            u_count: 3,
            v_count: 5,
            u_range: None,
            v_range: None,
        }
    }
}

/// Top-level configuration handed to the compilers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub attributes: AttributeDefaults,
    pub limb: LimbConfig,
    pub lattice: LatticeConfig,
    pub ribbon: RibbonConfig,
    pub cage: CageConfig,
    pub basic: BasicRigConfig,
    pub eye: EyeConfig,
    pub pin_grid: PinGridConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CompilerConfig = serde_json::from_str(
            r#"{ "limb": { "prefix": "arm_l", "axes": { "primary": "y" } }, "attributes": { "max_stretch": 2.0 } }"#,
        )
        .expect("config parses");
        assert_eq!(cfg.limb.prefix, "arm_l");
        assert_eq!(cfg.limb.axes.primary, Axis::Y);
        assert_eq!(cfg.limb.axes.secondary, Axis::Y);
        assert_eq!(cfg.limb.bind_pattern, "_bnd");
        assert_eq!(cfg.attributes.max_stretch, 2.0);
        assert_eq!(cfg.attributes.follow_rotation, 1.0);
        assert_eq!(cfg.ribbon, RibbonConfig::default());
    }

    #[test]
    fn eye_and_grid_sections_are_optional() {
        let cfg: CompilerConfig =
            serde_json::from_str(r#"{ "eye": { "name": "eye_l", "subdivisions": 8 }, "pin_grid": { "u_range": [0.0, 1.0] } }"#)
                .expect("config parses");
        assert_eq!(cfg.eye.name, "eye_l");
        assert_eq!(cfg.eye.subdivisions, 8);
        assert_eq!(cfg.eye.pupil_edge, 16);
        assert_eq!(cfg.pin_grid.u_range, Some([0.0, 1.0]));
        assert_eq!(cfg.pin_grid.v_range, None);
        assert_eq!((cfg.pin_grid.u_count, cfg.pin_grid.v_count), (3, 5));
    }
}
