//! Typed kernel parameters.

use std::fmt;

use crate::{GpuipError, GpuipResult};

/// Parameter type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
        }
    }
}

/// A named scalar passed to a kernel at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int { name: String, value: i32 },
    Float { name: String, value: f32 },
}

impl Param {
    pub fn int(name: &str, value: i32) -> Self {
        Self::Int { name: name.to_string(), value }
    }

    pub fn float(name: &str, value: f32) -> Self {
        Self::Float { name: name.to_string(), value }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Int { name, .. } | Self::Float { name, .. } => name,
        }
    }

    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Int { .. } => ParamType::Int,
            Self::Float { .. } => ParamType::Float,
        }
    }
}

/// Parameters of one kernel, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    params: Vec<Param>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter or replace the value of an existing one.
    ///
    /// Replacement keeps the original declaration position. A parameter
    /// cannot change type once declared.
    pub fn set(&mut self, param: Param) -> GpuipResult<()> {
        match self.params.iter_mut().find(|p| p.name() == param.name()) {
            Some(existing) if existing.param_type() != param.param_type() => {
                Err(GpuipError::ParamTypeMismatch {
                    name: param.name().to_string(),
                    existing: existing.param_type(),
                    requested: param.param_type(),
                })
            }
            Some(existing) => {
                *existing = param;
                Ok(())
            }
            None => {
                self.params.push(param);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// Integer parameters in declaration order.
    pub fn ints(&self) -> impl Iterator<Item = (&str, i32)> {
        self.params.iter().filter_map(|p| match p {
            Param::Int { name, value } => Some((name.as_str(), *value)),
            Param::Float { .. } => None,
        })
    }

    /// Float parameters in declaration order.
    pub fn floats(&self) -> impl Iterator<Item = (&str, f32)> {
        self.params.iter().filter_map(|p| match p {
            Param::Float { name, value } => Some((name.as_str(), *value)),
            Param::Int { .. } => None,
        })
    }

    /// Parameters in signature order: all ints, then all floats.
    pub fn signature_order(&self) -> impl Iterator<Item = &Param> {
        let ints = self.params.iter().filter(|p| p.param_type() == ParamType::Int);
        let floats = self.params.iter().filter(|p| p.param_type() == ParamType::Float);
        ints.chain(floats)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
