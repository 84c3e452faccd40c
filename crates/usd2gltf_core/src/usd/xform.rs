//! Transform operations (`xformOp:*`) and their composition.

use glam::{EulerRot, Mat4, Quat, Vec3};

use super::prim::{Attribute, Prim};
use super::types::Value;

const OP_PREFIX: &str = "xformOp:";
const INVERT_PREFIX: &str = "!invert!";
const RESET_XFORM_STACK: &str = "!resetXformStack!";

/// Order of the three rotations in a `rotateABC` op.
///
/// `rotateXYZ` rotates about X first, then Y, then Z.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationOrder {
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

impl RotationOrder {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "XYZ" => Some(Self::Xyz),
            "XZY" => Some(Self::Xzy),
            "YXZ" => Some(Self::Yxz),
            "YZX" => Some(Self::Yzx),
            "ZXY" => Some(Self::Zxy),
            "ZYX" => Some(Self::Zyx),
            _ => None,
        }
    }

    /// glam names the outermost rotation first, so `rotateXYZ` (X applied
    /// first) is `EulerRot::ZYX` with the angles reversed.
    fn to_quat(self, degrees: Vec3) -> Quat {
        let r = degrees * std::f32::consts::PI / 180.0;
        match self {
            Self::Xyz => Quat::from_euler(EulerRot::ZYX, r.z, r.y, r.x),
            Self::Xzy => Quat::from_euler(EulerRot::YZX, r.y, r.z, r.x),
            Self::Yxz => Quat::from_euler(EulerRot::ZXY, r.z, r.x, r.y),
            Self::Yzx => Quat::from_euler(EulerRot::XZY, r.x, r.z, r.y),
            Self::Zxy => Quat::from_euler(EulerRot::YXZ, r.y, r.x, r.z),
            Self::Zyx => Quat::from_euler(EulerRot::XYZ, r.x, r.y, r.z),
        }
    }
}

/// A transform operation with its value resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum XformOp {
    /// Translation (xformOp:translate)
    Translate(Vec3),

    /// Rotation in degrees around X axis
    RotateX(f32),

    /// Rotation in degrees around Y axis
    RotateY(f32),

    /// Rotation in degrees around Z axis
    RotateZ(f32),

    /// Three-axis rotation in degrees
    Rotate(Vec3, RotationOrder),

    /// Quaternion orientation
    Orient(Quat),

    /// Scale (uniform or non-uniform)
    Scale(Vec3),

    /// Full 4x4 transform matrix
    Transform(Mat4),
}

impl XformOp {
    /// Resolve an op from its attribute name and value.
    ///
    /// The name is the op type plus an optional suffix
    /// (`xformOp:translate:pivot`). Returns `None` for unsupported op types
    /// or values of the wrong kind.
    pub fn from_value(name: &str, value: &Value) -> Option<Self> {
        let op_type = name.strip_prefix(OP_PREFIX)?.split(':').next()?;
        let op = match op_type {
            "translate" => XformOp::Translate(value.as_vec3()?),
            "scale" => XformOp::Scale(value.as_vec3()?),
            "rotateX" => XformOp::RotateX(value.as_f32()?),
            "rotateY" => XformOp::RotateY(value.as_f32()?),
            "rotateZ" => XformOp::RotateZ(value.as_f32()?),
            "orient" => XformOp::Orient(value.as_quat()?.normalize()),
            "transform" => XformOp::Transform(value.as_matrix4()?),
            other => {
                let order = other.strip_prefix("rotate").and_then(RotationOrder::from_suffix)?;
                XformOp::Rotate(value.as_vec3()?, order)
            }
        };
        Some(op)
    }

    /// Convert this operation to a transformation matrix.
    pub fn to_matrix(&self) -> Mat4 {
        match self {
            XformOp::Translate(t) => Mat4::from_translation(*t),
            XformOp::RotateX(deg) => Mat4::from_rotation_x(deg.to_radians()),
            XformOp::RotateY(deg) => Mat4::from_rotation_y(deg.to_radians()),
            XformOp::RotateZ(deg) => Mat4::from_rotation_z(deg.to_radians()),
            XformOp::Rotate(degrees, order) => Mat4::from_quat(order.to_quat(*degrees)),
            XformOp::Orient(q) => Mat4::from_quat(*q),
            XformOp::Scale(s) => Mat4::from_scale(*s),
            XformOp::Transform(m) => *m,
        }
    }
}

/// Combine a list of xformOps into a single matrix.
///
/// Ops are listed outermost first, so the last op is applied to points first.
pub fn compose_xform_ops(ops: &[XformOp]) -> Mat4 {
    let mut result = Mat4::IDENTITY;
    for op in ops {
        result *= op.to_matrix();
    }
    result
}

/// Transform view of a prim.
pub struct Xformable<'a> {
    prim: &'a Prim,
}

impl<'a> Xformable<'a> {
    pub fn new(prim: &'a Prim) -> Self {
        Self { prim }
    }

    /// Op attributes in application order, each with its inversion flag.
    ///
    /// Follows `xformOpOrder` when authored. Without it, every `xformOp:*`
    /// attribute is used in declaration order.
    pub fn ordered_ops(&self) -> Vec<(&'a Attribute, bool)> {
        let prim = self.prim;
        match prim.value("xformOpOrder").and_then(Value::as_token_array) {
            Some(order) => order
                .iter()
                .filter(|name| name.as_str() != RESET_XFORM_STACK)
                .filter_map(|name| {
                    let (attr_name, inverse) = match name.strip_prefix(INVERT_PREFIX) {
                        Some(rest) => (rest, true),
                        None => (name.as_str(), false),
                    };
                    match prim.attribute(attr_name) {
                        Some(attr) => Some((attr, inverse)),
                        None => {
                            log::warn!(
                                "{}: xformOpOrder names missing attribute {}",
                                prim.path(),
                                attr_name
                            );
                            None
                        }
                    }
                })
                .collect(),
            None => prim
                .attributes()
                .filter(|a| a.name.starts_with(OP_PREFIX))
                .map(|a| (a, false))
                .collect(),
        }
    }

    /// Whether the prim discards its parent transform.
    pub fn resets_xform_stack(&self) -> bool {
        self.prim
            .value("xformOpOrder")
            .and_then(Value::as_token_array)
            .is_some_and(|order| order.first().map(String::as_str) == Some(RESET_XFORM_STACK))
    }

    pub fn has_ops(&self) -> bool {
        !self.ordered_ops().is_empty()
    }

    /// Local transform at a time code.
    pub fn local_transform(&self, time: f64) -> Mat4 {
        let mut result = Mat4::IDENTITY;
        for (attr, inverse) in self.ordered_ops() {
            let Some(value) = attr.get_at(time) else {
                continue;
            };
            match XformOp::from_value(&attr.name, &value) {
                Some(op) => {
                    let m = op.to_matrix();
                    result *= if inverse { m.inverse() } else { m };
                }
                None => log::debug!(
                    "{}: unsupported transform op {} ({})",
                    self.prim.path(),
                    attr.name,
                    attr.type_name
                ),
            }
        }
        result
    }

    /// Sorted union of the sample times of every op.
    pub fn sample_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .ordered_ops()
            .iter()
            .flat_map(|(attr, _)| attr.time_samples().iter().map(|(t, _)| *t))
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// Whether any op varies over time.
    pub fn is_animated(&self) -> bool {
        self.ordered_ops().iter().any(|(attr, _)| attr.is_animated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::parser::parse_usda;
    use crate::usd::SdfPath;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_xform_ops() {
        let translate = XformOp::Translate(Vec3::new(1.0, 2.0, 3.0));
        let matrix = translate.to_matrix();

        let origin = matrix.transform_point3(Vec3::ZERO);
        assert!(approx(origin, Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_rotate_xyz_applies_x_first() {
        // X by 90 takes +Y to +Z, then Z by 90 leaves +Z alone.
        let op = XformOp::Rotate(Vec3::new(90.0, 0.0, 90.0), RotationOrder::Xyz);
        let p = op.to_matrix().transform_point3(Vec3::Y);
        assert!(approx(p, Vec3::Z));

        // Z by 90 takes +X to +Y, then X by 90 takes +Y to +Z.
        let op = XformOp::Rotate(Vec3::new(90.0, 0.0, 90.0), RotationOrder::Zyx);
        let p = op.to_matrix().transform_point3(Vec3::X);
        assert!(approx(p, Vec3::Z));
    }

    #[test]
    fn test_from_value_with_suffix() {
        let op = XformOp::from_value("xformOp:translate:pivot", &Value::Vec3(Vec3::ONE));
        assert_eq!(op, Some(XformOp::Translate(Vec3::ONE)));
        assert_eq!(XformOp::from_value("xformOp:shear", &Value::Vec3(Vec3::ONE)), None);
        assert_eq!(XformOp::from_value("xformOp:translate", &Value::Float(1.0)), None);
    }

    #[test]
    fn test_op_order_and_inverse() {
        let usda = r#"
def Xform "A"
{
    double3 xformOp:translate = (10, 0, 0)
    float xformOp:rotateZ = 90
    double3 xformOp:translate:pivot = (1, 0, 0)
    uniform token[] xformOpOrder = ["xformOp:translate", "xformOp:rotateZ", "xformOp:translate:pivot", "!invert!xformOp:translate:pivot"]
}
"#;
        let stage = parse_usda(usda).unwrap();
        let prim = stage.prim(&SdfPath::new("/A").unwrap()).unwrap();
        let xf = Xformable::new(prim);
        assert_eq!(xf.ordered_ops().len(), 4);

        // Pivot cancels out: rotate (1,0,0) to (0,1,0) then translate.
        let p = xf.local_transform(0.0).transform_point3(Vec3::X);
        assert!(approx(p, Vec3::new(10.0, 1.0, 0.0)));
        assert!(!xf.is_animated());
    }

    #[test]
    fn test_sample_times_union() {
        let usda = r#"
def Xform "A"
{
    double3 xformOp:translate.timeSamples = { 0: (0, 0, 0), 10: (10, 0, 0) }
    float xformOp:rotateY.timeSamples = { 5: 0, 10: 90 }
    uniform token[] xformOpOrder = ["!resetXformStack!", "xformOp:translate", "xformOp:rotateY"]
}
"#;
        let stage = parse_usda(usda).unwrap();
        let prim = stage.prim(&SdfPath::new("/A").unwrap()).unwrap();
        let xf = Xformable::new(prim);
        assert!(xf.resets_xform_stack());
        assert!(xf.is_animated());
        assert_eq!(xf.sample_times(), vec![0.0, 5.0, 10.0]);

        let p = xf.local_transform(5.0).transform_point3(Vec3::ZERO);
        assert!(approx(p, Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_declaration_order_without_op_order() {
        let usda = r#"
def Xform "A"
{
    double3 xformOp:translate = (0, 5, 0)
    double3 xformOp:scale = (2, 2, 2)
}
"#;
        let stage = parse_usda(usda).unwrap();
        let prim = stage.prim(&SdfPath::new("/A").unwrap()).unwrap();
        let p = Xformable::new(prim).local_transform(0.0).transform_point3(Vec3::ONE);
        assert!(approx(p, Vec3::new(2.0, 7.0, 2.0)));
    }
}
