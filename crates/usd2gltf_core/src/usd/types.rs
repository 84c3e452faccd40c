//! Value types for attributes on USD prims.
//!
//! USD attributes declare a type name (`float3`, `token[]`, `color3f`, ...).
//! Values assigned to an attribute must match the role-independent kind of
//! that type name, which is what [`TypeName::accepts`] checks.

use std::fmt;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Base (non-array) value types understood by the stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Double,
    String,
    Token,
    Asset,
    /// Any 2-component type (`float2`, `texCoord2f`, `double2`, ...)
    Vec2(String),
    /// Any 3-component type (`float3`, `color3f`, `normal3f`, `point3f`, ...)
    Vec3(String),
    /// Any 4-component type (`float4`, `color4f`, ...)
    Vec4(String),
    /// Quaternions (`quatf`, `quatd`, `quath`)
    Quat(String),
    Matrix4,
    /// Type names we carry but do not interpret.
    Unknown(String),
}

impl ValueType {
    /// Parse a base type name (without `[]`).
    pub fn from_name(name: &str) -> Self {
        match name {
            "bool" => ValueType::Bool,
            "int" | "uint" | "int64" | "uint64" | "uchar" => ValueType::Int,
            "float" | "half" => ValueType::Float,
            "double" | "timecode" => ValueType::Double,
            "string" => ValueType::String,
            "token" => ValueType::Token,
            "asset" => ValueType::Asset,
            "float2" | "double2" | "half2" | "int2" | "texCoord2f" | "texCoord2d" | "texCoord2h" => {
                ValueType::Vec2(name.to_string())
            }
            "float3" | "double3" | "half3" | "int3" | "color3f" | "color3d" | "color3h"
            | "normal3f" | "normal3d" | "normal3h" | "point3f" | "point3d" | "point3h"
            | "vector3f" | "vector3d" | "vector3h" | "texCoord3f" | "texCoord3d" => {
                ValueType::Vec3(name.to_string())
            }
            "float4" | "double4" | "half4" | "int4" | "color4f" | "color4d" | "color4h" => {
                ValueType::Vec4(name.to_string())
            }
            "quatf" | "quatd" | "quath" => ValueType::Quat(name.to_string()),
            "matrix4d" => ValueType::Matrix4,
            other => ValueType::Unknown(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Token => "token",
            ValueType::Asset => "asset",
            ValueType::Matrix4 => "matrix4d",
            ValueType::Vec2(n)
            | ValueType::Vec3(n)
            | ValueType::Vec4(n)
            | ValueType::Quat(n)
            | ValueType::Unknown(n) => n,
        }
    }
}

/// A declared attribute type such as `float2` or `token[]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeName {
    pub base: ValueType,
    pub is_array: bool,
}

impl TypeName {
    /// Parse a type name as written in USDA (`float3[]`, `token`, ...).
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        match name.strip_suffix("[]") {
            Some(base) => Self {
                base: ValueType::from_name(base.trim()),
                is_array: true,
            },
            None => Self {
                base: ValueType::from_name(name),
                is_array: false,
            },
        }
    }

    pub fn token() -> Self {
        Self::parse("token")
    }

    pub fn float2() -> Self {
        Self::parse("float2")
    }

    /// Whether a value may be stored in an attribute of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        use ValueType as T;

        if let T::Unknown(_) = self.base {
            return true;
        }

        match (self.is_array, &self.base, value) {
            (false, T::Bool, Value::Bool(_)) => true,
            (false, T::Int, Value::Int(_)) => true,
            (false, T::Float, Value::Float(_)) => true,
            (false, T::Double, Value::Double(_)) => true,
            (false, T::String, Value::String(_)) => true,
            (false, T::Token, Value::Token(_)) => true,
            (false, T::Asset, Value::Asset(_)) => true,
            (false, T::Vec2(_), Value::Vec2(_)) => true,
            (false, T::Vec3(_), Value::Vec3(_)) => true,
            (false, T::Vec4(_), Value::Vec4(_)) => true,
            (false, T::Quat(_), Value::Quat(_)) => true,
            (false, T::Matrix4, Value::Matrix4(_)) => true,
            (true, T::Int | T::Bool, Value::IntArray(_)) => true,
            (true, T::Float | T::Double, Value::FloatArray(_)) => true,
            (true, T::Vec2(_), Value::Vec2Array(_)) => true,
            (true, T::Vec3(_), Value::Vec3Array(_)) => true,
            (true, T::Vec4(_), Value::Vec4Array(_)) => true,
            (true, T::Quat(_), Value::QuatArray(_)) => true,
            (true, T::Token, Value::TokenArray(_)) => true,
            (true, T::String | T::Asset, Value::StringArray(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "{}[]", self.base.name())
        } else {
            write!(f, "{}", self.base.name())
        }
    }
}

/// An attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Double(f64),
    String(String),
    Token(String),
    Asset(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    Matrix4(Mat4),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
    Vec2Array(Vec<Vec2>),
    Vec3Array(Vec<Vec3>),
    Vec4Array(Vec<Vec4>),
    QuatArray(Vec<Quat>),
    TokenArray(Vec<String>),
    StringArray(Vec<String>),
}

impl Value {
    /// Token value from anything string-like.
    pub fn token(s: impl Into<String>) -> Self {
        Value::Token(s.into())
    }

    /// Numeric scalar as f32.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Double(v) => Some(*v as f32),
            Value::Int(v) => Some(*v as f32),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Value::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_quat(&self) -> Option<Quat> {
        match self {
            Value::Quat(q) => Some(*q),
            _ => None,
        }
    }

    pub fn as_matrix4(&self) -> Option<Mat4> {
        match self {
            Value::Matrix4(m) => Some(*m),
            _ => None,
        }
    }

    /// String payload of token, string and asset values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Token(s) | Value::String(s) | Value::Asset(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Value::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec2_array(&self) -> Option<&[Vec2]> {
        match self {
            Value::Vec2Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3_array(&self) -> Option<&[Vec3]> {
        match self {
            Value::Vec3Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_token_array(&self) -> Option<&[String]> {
        match self {
            Value::TokenArray(v) | Value::StringArray(v) => Some(v),
            _ => None,
        }
    }

    /// Linear interpolation between two samples of the same kind.
    ///
    /// Returns `None` for kinds that are held rather than interpolated
    /// (tokens, strings, ints, mismatched array lengths).
    pub fn lerp(&self, other: &Value, t: f32) -> Option<Value> {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => Some(Value::Float(a + (b - a) * t)),
            (Value::Double(a), Value::Double(b)) => {
                Some(Value::Double(a + (b - a) * f64::from(t)))
            }
            (Value::Vec2(a), Value::Vec2(b)) => Some(Value::Vec2(a.lerp(*b, t))),
            (Value::Vec3(a), Value::Vec3(b)) => Some(Value::Vec3(a.lerp(*b, t))),
            (Value::Vec4(a), Value::Vec4(b)) => Some(Value::Vec4(a.lerp(*b, t))),
            (Value::Quat(a), Value::Quat(b)) => Some(Value::Quat(a.slerp(*b, t))),
            (Value::Vec3Array(a), Value::Vec3Array(b)) if a.len() == b.len() => Some(
                Value::Vec3Array(a.iter().zip(b).map(|(x, y)| x.lerp(*y, t)).collect()),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_parse() {
        let ty = TypeName::parse("texCoord2f[]");
        assert!(ty.is_array);
        assert!(matches!(ty.base, ValueType::Vec2(_)));
        assert_eq!(ty.to_string(), "texCoord2f[]");

        assert_eq!(TypeName::parse("token").base, ValueType::Token);
    }

    #[test]
    fn test_accepts_checks_kind() {
        assert!(TypeName::token().accepts(&Value::token("st")));
        assert!(!TypeName::token().accepts(&Value::Float(1.0)));
        assert!(TypeName::parse("color3f").accepts(&Value::Vec3(Vec3::ONE)));
        assert!(!TypeName::parse("float3[]").accepts(&Value::Vec3(Vec3::ONE)));
        assert!(TypeName::parse("dictionary").accepts(&Value::Int(3)));
    }

    #[test]
    fn test_lerp() {
        let a = Value::Vec3(Vec3::ZERO);
        let b = Value::Vec3(Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(a.lerp(&b, 0.5), Some(Value::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        assert_eq!(Value::token("a").lerp(&Value::token("b"), 0.5), None);
    }
}
