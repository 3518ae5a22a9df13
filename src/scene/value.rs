use super::ScenePath;

/// A typed attribute or relationship value stored on a prim.
///
/// Relationships are stored as `PathArray` under the relationship name.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Token(String),
    Asset(String),
    Vec2f([f32; 2]),
    Vec3f([f32; 3]),
    Vec3d([f64; 3]),
    Quatf([f32; 4]),
    Matrix4d([f64; 16]),
    Range3d { min: [f64; 3], max: [f64; 3] },
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
    Vec2fArray(Vec<[f32; 2]>),
    Vec3fArray(Vec<[f32; 3]>),
    TokenArray(Vec<String>),
    PathArray(Vec<ScenePath>),
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String-like values: strings, tokens and asset paths.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Token(v) | Self::Asset(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3f(&self) -> Option<[f32; 3]> {
        match self {
            Self::Vec3f(v) => Some(*v),
            Self::Vec3fArray(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_vec3d(&self) -> Option<[f64; 3]> {
        match self {
            Self::Vec3d(v) => Some(*v),
            Self::Vec3f(v) => Some([v[0] as f64, v[1] as f64, v[2] as f64]),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<[f64; 16]> {
        match self {
            Self::Matrix4d(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_paths(&self) -> Option<&[ScenePath]> {
        match self {
            Self::PathArray(v) => Some(v),
            _ => None,
        }
    }

    /// Element count for array values, `None` for scalars.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Self::IntArray(v) => Some(v.len()),
            Self::FloatArray(v) => Some(v.len()),
            Self::Vec2fArray(v) => Some(v.len()),
            Self::Vec3fArray(v) => Some(v.len()),
            Self::TokenArray(v) => Some(v.len()),
            Self::PathArray(v) => Some(v.len()),
            _ => None,
        }
    }
}
