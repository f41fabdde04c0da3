//! Shape utilities for graph values
//!
//! Dimensions are either static or dynamic. Two dimensions are compatible
//! when either side is dynamic or both are equal; rewrites that need a
//! dimension match check compatibility, not equality.

use std::fmt;

use crate::error::{GraphResult, TransformError};

use super::dtype::ElementType;

/// A single tensor dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Known extent
    Static(usize),
    /// Unknown extent
    Dynamic,
}

impl Dimension {
    /// Three-valued compatibility: dynamic on either side is compatible
    pub fn compatible(self, other: Dimension) -> bool {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            _ => true,
        }
    }

    /// Static extent, if known
    pub fn get_static(self) -> Option<usize> {
        match self {
            Dimension::Static(d) => Some(d),
            Dimension::Dynamic => None,
        }
    }

    /// Check if the extent is known
    pub fn is_static(self) -> bool {
        matches!(self, Dimension::Static(_))
    }

    /// Combine two compatible dimensions, preferring the static one
    pub fn merge(self, other: Dimension) -> Dimension {
        match (self, other) {
            (Dimension::Static(a), _) => Dimension::Static(a),
            (Dimension::Dynamic, d) => d,
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Static(value)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(d) => write!(f, "{}", d),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Shape whose rank and dimensions may be partially unknown
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialShape {
    dims: Option<Vec<Dimension>>,
}

impl PartialShape {
    /// Shape of known rank
    pub fn new(dims: Vec<Dimension>) -> Self {
        Self { dims: Some(dims) }
    }

    /// Shape of unknown rank
    pub fn dynamic() -> Self {
        Self { dims: None }
    }

    /// Shape of known rank with every dimension dynamic
    pub fn dynamic_of_rank(rank: usize) -> Self {
        Self::new(vec![Dimension::Dynamic; rank])
    }

    /// Fully static shape
    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().map(|&d| Dimension::Static(d)).collect())
    }

    /// Scalar shape `[]`
    pub fn scalar() -> Self {
        Self::new(Vec::new())
    }

    /// Rank, if known
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    /// Dimensions, if the rank is known
    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    /// Dimension at `index`; dynamic when the rank is unknown or out of range
    pub fn dim(&self, index: usize) -> Dimension {
        self.dims
            .as_ref()
            .and_then(|d| d.get(index).copied())
            .unwrap_or(Dimension::Dynamic)
    }

    /// Check if rank and every dimension are known
    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .map(|d| d.iter().all(|dim| dim.is_static()))
            .unwrap_or(false)
    }

    /// Static extents, if fully known
    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.dims
            .as_ref()?
            .iter()
            .map(|d| d.get_static())
            .collect()
    }

    /// Shapes are compatible if ranks agree (or either is unknown) and every
    /// dimension pair is compatible
    pub fn compatible(&self, other: &PartialShape) -> bool {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(*y))
            }
            _ => true,
        }
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => f.write_str("[...]"),
            Some(dims) => {
                f.write_str("[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", d)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Element type and shape of one node output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Element type
    pub element_type: ElementType,
    /// Partial shape
    pub shape: PartialShape,
}

impl TensorInfo {
    /// Create a new descriptor
    pub fn new(element_type: ElementType, shape: PartialShape) -> Self {
        Self {
            element_type,
            shape,
        }
    }
}

/// Calculate total number of elements from a static shape
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Numpy-style broadcast of two partial shapes
pub fn broadcast_shape(a: &PartialShape, b: &PartialShape) -> GraphResult<PartialShape> {
    let (a_dims, b_dims) = match (a.dims(), b.dims()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(PartialShape::dynamic()),
    };

    let rank = a_dims.len().max(b_dims.len());
    let mut result = vec![Dimension::Dynamic; rank];

    for i in 0..rank {
        // Index from the right (broadcasting aligns trailing dimensions)
        let dim_a = if i < a_dims.len() {
            a_dims[a_dims.len() - 1 - i]
        } else {
            Dimension::Static(1)
        };
        let dim_b = if i < b_dims.len() {
            b_dims[b_dims.len() - 1 - i]
        } else {
            Dimension::Static(1)
        };

        let out = match (dim_a, dim_b) {
            (Dimension::Static(1), d) | (d, Dimension::Static(1)) => d,
            (Dimension::Static(x), Dimension::Static(y)) if x != y => {
                return Err(TransformError::ShapeInferenceFailed(format!(
                    "Shapes {} and {} are not broadcastable",
                    a, b
                )));
            }
            (x, y) => x.merge(y),
        };
        result[rank - 1 - i] = out;
    }

    Ok(PartialShape::new(result))
}

/// Normalize axis to positive index
pub fn normalize_axis(axis: i64, rank: usize) -> GraphResult<usize> {
    let rank_i64 = rank as i64;
    let normalized = if axis < 0 { axis + rank_i64 } else { axis };

    if normalized < 0 || normalized >= rank_i64 {
        return Err(TransformError::InvalidNode(format!(
            "Axis {} out of bounds for rank {}",
            axis, rank
        )));
    }

    Ok(normalized as usize)
}

/// Normalize multiple axes
pub fn normalize_axes(axes: &[i64], rank: usize) -> GraphResult<Vec<usize>> {
    axes.iter().map(|&a| normalize_axis(a, rank)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_compatible() {
        assert!(Dimension::Static(3).compatible(Dimension::Static(3)));
        assert!(!Dimension::Static(3).compatible(Dimension::Static(4)));
        assert!(Dimension::Dynamic.compatible(Dimension::Static(4)));
        assert!(Dimension::Static(4).compatible(Dimension::Dynamic));
        assert!(Dimension::Dynamic.compatible(Dimension::Dynamic));
    }

    #[test]
    fn test_partial_shape_queries() {
        let shape = PartialShape::new(vec![Dimension::Dynamic, 3.into(), 4.into()]);
        assert_eq!(shape.rank(), Some(3));
        assert!(!shape.is_static());
        assert_eq!(shape.to_static(), None);
        assert_eq!(shape.dim(1), Dimension::Static(3));
        assert_eq!(shape.dim(7), Dimension::Dynamic);
        assert_eq!(shape.to_string(), "[?,3,4]");

        let unranked = PartialShape::dynamic();
        assert_eq!(unranked.rank(), None);
        assert!(unranked.compatible(&shape));
    }

    #[test]
    fn test_partial_shape_compatible() {
        let a = PartialShape::new(vec![Dimension::Dynamic, 3.into()]);
        assert!(a.compatible(&PartialShape::from_static(&[5, 3])));
        assert!(!a.compatible(&PartialShape::from_static(&[5, 4])));
        assert!(!a.compatible(&PartialShape::from_static(&[5, 3, 1])));
    }

    #[test]
    fn test_broadcast_shape() {
        let out = broadcast_shape(
            &PartialShape::from_static(&[3, 4]),
            &PartialShape::from_static(&[4]),
        )
        .unwrap();
        assert_eq!(out, PartialShape::from_static(&[3, 4]));

        let out = broadcast_shape(
            &PartialShape::new(vec![Dimension::Dynamic, 1.into()]),
            &PartialShape::from_static(&[2, 5]),
        )
        .unwrap();
        assert_eq!(out, PartialShape::from_static(&[2, 5]));

        assert!(broadcast_shape(
            &PartialShape::from_static(&[3, 4]),
            &PartialShape::from_static(&[5]),
        )
        .is_err());
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(0, 4).unwrap(), 0);
        assert_eq!(normalize_axis(-1, 4).unwrap(), 3);
        assert!(normalize_axis(4, 4).is_err());
        assert!(normalize_axis(-5, 4).is_err());
        assert_eq!(normalize_axes(&[-1, 0], 3).unwrap(), vec![2, 0]);
    }
}
