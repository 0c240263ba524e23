// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Typed property values carried by [`TreeNode`](super::TreeNode).

/// Tagged property value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Void,
    Int32(i32),
    Int64(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Variant {
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Integer view of numeric and boolean values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Floating point view of numeric and boolean values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int32(v) => Some(*v != 0),
            Self::Int64(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Variant {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<&[u8]> for Variant {
    fn from(v: &[u8]) -> Self {
        Self::Binary(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Variant::Int32(7).as_f64(), Some(7.0));
        assert_eq!(Variant::Double(2.9).as_i32(), Some(2));
        assert_eq!(Variant::Int64(i64::MAX).as_i32(), None);
        assert_eq!(Variant::Bool(true).as_i64(), Some(1));
        assert_eq!(Variant::from("x").as_f64(), None);
    }

    #[test]
    fn test_default_is_void() {
        assert!(Variant::default().is_void());
    }
}
