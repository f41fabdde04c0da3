//! Element type of graph values

use std::fmt;

/// Element type carried by every graph value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit float
    F32,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// Boolean
    Boolean,
    /// Not known statically
    Dynamic,
}

impl ElementType {
    /// Short lowercase name (`f32`, `i64`, ...)
    pub fn name(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::Boolean => "boolean",
            ElementType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
