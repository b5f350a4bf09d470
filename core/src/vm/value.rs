//! Runtime values: up to four `f32` lanes plus a type tag.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::syntax::Swizzle;

/// Maximum number of components a value can carry.
pub const MAX_LANES: usize = 4;

pub type Lanes = [f32; MAX_LANES];

/// Runtime type of a value, mirrored by the metadata type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueType {
    #[default]
    Numeric,
    /// Opaque identifier (entity handle, resource id...). Stored as raw `u32` bits.
    Id,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Numeric => f.write_str("numeric"),
            ValueType::Id => f.write_str("id"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub lanes: Lanes,
    pub size: u8,
    pub ty: ValueType,
}

impl Value {
    pub const ZERO: Value = Value {
        lanes: [0.0; MAX_LANES],
        size: 1,
        ty: ValueType::Numeric,
    };

    pub fn scalar(x: f32) -> Self {
        Self {
            lanes: [x, 0.0, 0.0, 0.0],
            size: 1,
            ty: ValueType::Numeric,
        }
    }

    /// Builds a numeric vector from up to four components.
    ///
    /// Components past the fourth are ignored; an empty slice yields a scalar zero.
    pub fn vector(components: &[f32]) -> Self {
        let mut lanes = [0.0; MAX_LANES];
        let size = components.len().clamp(1, MAX_LANES);
        for (lane, c) in lanes.iter_mut().zip(components) {
            *lane = *c;
        }
        Self {
            lanes,
            size: size as u8,
            ty: ValueType::Numeric,
        }
    }

    pub fn splat(x: f32, size: u8) -> Self {
        Self {
            lanes: [x; MAX_LANES],
            size: size.clamp(1, MAX_LANES as u8),
            ty: ValueType::Numeric,
        }
    }

    pub fn zero(ty: ValueType, size: u8) -> Self {
        Self {
            lanes: [0.0; MAX_LANES],
            size: size.clamp(1, MAX_LANES as u8),
            ty,
        }
    }

    pub fn id(id: u32) -> Self {
        Self {
            lanes: [f32::from_bits(id), 0.0, 0.0, 0.0],
            size: 1,
            ty: ValueType::Id,
        }
    }

    /// Value substituted when a checked build detects a violated assertion.
    pub fn sentinel(ty: ValueType, size: u8) -> Self {
        let lane = match ty {
            ValueType::Numeric => f32::NAN,
            ValueType::Id => f32::from_bits(i32::MIN as u32),
        };
        Self {
            lanes: [lane; MAX_LANES],
            size: size.clamp(1, MAX_LANES as u8),
            ty,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.lanes[..self.size as usize]
    }

    /// Component `i`, broadcasting scalars.
    #[inline]
    pub fn lane(&self, i: usize) -> f32 {
        if self.size == 1 {
            self.lanes[0]
        } else {
            self.lanes[i.min(MAX_LANES - 1)]
        }
    }

    pub fn as_id(&self) -> u32 {
        self.lanes[0].to_bits()
    }

    /// Truthiness of the first component.
    pub fn is_true(&self) -> bool {
        match self.ty {
            ValueType::Numeric => self.lanes[0] != 0.0,
            ValueType::Id => self.lanes[0].to_bits() != 0,
        }
    }

    /// Widens a scalar to `size` lanes; vectors are returned unchanged.
    pub fn broadcast(mut self, size: u8) -> Self {
        if self.size == 1 && size > 1 {
            let x = self.lanes[0];
            self.lanes = [x; MAX_LANES];
            self.size = size.min(MAX_LANES as u8);
        }
        self
    }

    /// Selects components. Scalars broadcast; selecting past the end of a
    /// vector yields `None`.
    pub fn swizzle(&self, swizzle: Swizzle) -> Option<Value> {
        let mut out = Value {
            lanes: [0.0; MAX_LANES],
            size: swizzle.count,
            ty: self.ty,
        };
        for (i, c) in swizzle.components().enumerate() {
            if self.size > 1 && c >= self.size {
                return None;
            }
            out.lanes[i] = self.lane(c as usize);
        }
        Some(out)
    }

    /// Approximate equality used by validation rules and constant matching.
    pub fn approx_eq(&self, other: &Value, epsilon: f32) -> bool {
        let size = self.size.max(other.size) as usize;
        if self.size != other.size && self.size != 1 && other.size != 1 {
            return false;
        }
        (0..size).all(|i| {
            let (a, b) = (self.lane(i), other.lane(i));
            a == b || (a - b).abs() <= epsilon
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            ValueType::Id => write!(f, "Id({})", self.as_id()),
            ValueType::Numeric if self.size == 1 => write!(f, "{}", self.lanes[0]),
            ValueType::Numeric => f.debug_list().entries(self.as_slice()).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            ValueType::Id => write!(f, "#{}", self.as_id()),
            ValueType::Numeric if self.size == 1 => write!(f, "{}", self.lanes[0]),
            ValueType::Numeric => {
                f.write_str("(")?;
                for (i, x) in self.as_slice().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_broadcasts_through_lane() {
        let v = Value::scalar(2.5);
        assert_eq!(v.lane(3), 2.5);
        assert_eq!(v.broadcast(3).as_slice(), &[2.5, 2.5, 2.5]);
    }

    #[test]
    fn sentinel_is_nan_or_min_int() {
        assert!(Value::sentinel(ValueType::Numeric, 1).lanes[0].is_nan());
        assert_eq!(
            Value::sentinel(ValueType::Id, 1).as_id(),
            i32::MIN as u32
        );
    }

    #[test]
    fn approx_eq_respects_epsilon() {
        let a = Value::scalar(5.0005);
        assert!(a.approx_eq(&Value::scalar(5.0), 0.001));
        assert!(!Value::scalar(5.002).approx_eq(&Value::scalar(5.0), 0.001));
    }
}
