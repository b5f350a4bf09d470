//! The shared constant table addressed by bytes `0x40..=0x7F`.

use core::f32::consts;

use ecow::EcoString;

use crate::vm::opcode::CONSTANT_COUNT;

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantEntry {
    /// Name usable in source, for named constants.
    pub name: Option<EcoString>,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstantTableError {
    #[error("constant table is full ({CONSTANT_COUNT} entries)")]
    Full,
    #[error("constant '{0}' is already defined")]
    Duplicate(EcoString),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantTable {
    entries: Vec<ConstantEntry>,
}

const LITERALS: &[f32] = &[0.0, 1.0, -1.0, 2.0, 0.5, 3.0, 4.0, 5.0, 10.0, 100.0, 0.25, 0.1];

const NAMED: &[(&str, f32)] = &[
    ("PI", consts::PI),
    ("TAU", consts::TAU),
    ("HALF_PI", consts::FRAC_PI_2),
    ("E", consts::E),
    ("LN2", consts::LN_2),
    ("LN10", consts::LN_10),
    ("SQRT2", consts::SQRT_2),
    ("INV_SQRT2", consts::FRAC_1_SQRT_2),
    ("DEG2RAD", consts::PI / 180.0),
    ("RAD2DEG", 180.0 / consts::PI),
];

impl ConstantTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Common literals followed by the named mathematical constants.
    pub fn builtin() -> Self {
        let mut entries: Vec<ConstantEntry> = LITERALS
            .iter()
            .map(|&value| ConstantEntry { name: None, value })
            .collect();
        entries.extend(NAMED.iter().map(|&(name, value)| ConstantEntry {
            name: Some(name.into()),
            value,
        }));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(&mut self, name: &str, value: f32) -> Result<u8, ConstantTableError> {
        if self.lookup_name(name).is_some() {
            return Err(ConstantTableError::Duplicate(name.into()));
        }
        self.push(Some(name.into()), value)
    }

    /// Adds an anonymous literal.
    pub fn register_literal(&mut self, value: f32) -> Result<u8, ConstantTableError> {
        self.push(None, value)
    }

    fn push(&mut self, name: Option<EcoString>, value: f32) -> Result<u8, ConstantTableError> {
        if self.entries.len() >= CONSTANT_COUNT {
            return Err(ConstantTableError::Full);
        }
        self.entries.push(ConstantEntry { name, value });
        Ok((self.entries.len() - 1) as u8)
    }

    pub fn get(&self, index: u8) -> Option<f32> {
        self.entries.get(index as usize).map(|e| e.value)
    }

    pub fn entry(&self, index: u8) -> Option<&ConstantEntry> {
        self.entries.get(index as usize)
    }

    pub fn lookup_name(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
            .map(|i| i as u8)
    }

    /// Index of the entry closest to `value` within `epsilon`, exact matches first.
    pub fn find_value(&self, value: f32, epsilon: f32) -> Option<u8> {
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.value.to_bits() == value.to_bits())
        {
            return Some(i as u8);
        }
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, (e.value - value).abs()))
            .filter(|&(_, d)| d <= epsilon)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i as u8)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantEntry> {
        self.entries.iter()
    }
}

impl Default for ConstantTable {
    fn default() -> Self {
        Self::builtin()
    }
}
