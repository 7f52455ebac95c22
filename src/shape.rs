use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::Display;

use crate::common::MAX_DIMS;
use crate::utils::join_into_string;

/// The logical extents of a tensor, dimension 0 varying fastest.
///
/// Trailing size-one dimensions (other than dimension 0) are not part of the
/// rank: `(40, 40, 3, 1)` has rank 3. Querying a dimension at or beyond the
/// rank yields 1. The empty shape (rank 0) describes a tensor which has not
/// been initialized yet.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Deserialize, Serialize)]
pub struct TensorShape {
    dims: SmallVec<[u32; MAX_DIMS]>,
}

impl TensorShape {
    pub fn new(dims: &[u32]) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "TensorShape supports at most {} dimensions; got {:?}",
            MAX_DIMS,
            dims
        );
        let mut shape = TensorShape {
            dims: SmallVec::from_slice(dims),
        };
        shape.apply_dimension_correction();
        shape
    }

    pub fn empty() -> Self {
        TensorShape::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn num_dimensions(&self) -> usize {
        self.dims.len()
    }

    /// Returns the extent of dimension `dim`, or 1 if `dim` is beyond the rank.
    pub fn dim(&self, dim: usize) -> u32 {
        self.dims.get(dim).copied().unwrap_or(1)
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Sets the extent of a dimension, growing the rank if needed.
    pub fn set(&mut self, dim: usize, extent: u32) {
        assert!(dim < MAX_DIMS, "dimension {dim} out of range");
        if dim >= self.dims.len() {
            self.dims.resize(dim + 1, 1);
        }
        self.dims[dim] = extent;
        self.apply_dimension_correction();
    }

    /// The number of elements, or 0 for the empty shape.
    pub fn total_size(&self) -> u64 {
        if self.dims.is_empty() {
            return 0;
        }
        self.dims.iter().map(|&d| u64::from(d)).product()
    }

    fn apply_dimension_correction(&mut self) {
        while self.dims.len() > 1 && self.dims.last() == Some(&1) {
            self.dims.pop();
        }
    }
}

impl Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dims.is_empty() {
            return write!(f, "()");
        }
        write!(f, "{}", join_into_string(&self.dims, "×"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;
    use proptest::prelude::*;

    #[test]
    fn test_trailing_unit_dimensions_are_dropped() {
        let s = shape![40, 40, 3, 1];
        assert_eq!(s.num_dimensions(), 3);
        assert_eq!(s.dim(3), 1);
        assert_eq!(s.dim(5), 1);
        assert_eq!(s.total_size(), 4800);
    }

    #[test]
    fn test_dimension_zero_is_never_dropped() {
        let s = shape![1, 1];
        assert_eq!(s.num_dimensions(), 1);
        assert_eq!(s.dims(), &[1]);
    }

    #[test]
    fn test_empty_shape_has_no_elements() {
        let s = TensorShape::empty();
        assert!(s.is_empty());
        assert_eq!(s.total_size(), 0);
        assert_eq!(s.to_string(), "()");
    }

    #[test]
    fn test_set_grows_rank() {
        let mut s = shape![5];
        s.set(3, 6);
        assert_eq!(s.dims(), &[5, 1, 1, 6]);
        s.set(3, 1);
        assert_eq!(s.dims(), &[5]);
    }

    proptest! {
        #[test]
        fn test_dims_beyond_rank_are_one(dims in prop::collection::vec(1u32..8, 0..=MAX_DIMS)) {
            let s = TensorShape::new(&dims);
            for d in s.num_dimensions()..MAX_DIMS {
                prop_assert_eq!(s.dim(d), 1);
            }
            let expected: u64 = if dims.is_empty() { 0 } else { dims.iter().map(|&d| u64::from(d)).product() };
            prop_assert_eq!(s.total_size(), expected);
        }
    }
}
