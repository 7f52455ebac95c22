use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::common::{Coordinates, DataKind, MAX_DIMS};
use crate::shape::TensorShape;
use crate::utils::join_into_string;

pub type Strides = [u64; MAX_DIMS];

/// Elements of padding around the first two dimensions of a tensor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Deserialize, Serialize)]
pub struct PaddingSize {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// The region of a tensor which holds meaningful values.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Deserialize, Serialize)]
pub struct ValidRegion {
    pub anchor: Coordinates,
    pub shape: TensorShape,
}

/// Describes a tensor's layout: its shape, element kind, padding, and the
/// byte strides those imply.
///
/// A [TensorInfo] is mutated only while an operation is being configured.
/// Padding only ever grows.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub struct TensorInfo {
    shape: TensorShape,
    data_kind: Option<DataKind>,
    padding: PaddingSize,
    strides: Strides,
    offset_first_element: u64,
    total_size: u64,
    valid_region: ValidRegion,
}

impl PaddingSize {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        PaddingSize {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == PaddingSize::default()
    }

    /// The per-side maximum of `self` and `other`.
    pub fn max(&self, other: &PaddingSize) -> PaddingSize {
        PaddingSize {
            top: self.top.max(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
            left: self.left.max(other.left),
        }
    }
}

impl Display for PaddingSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t{} r{} b{} l{}",
            self.top, self.right, self.bottom, self.left
        )
    }
}

impl ValidRegion {
    /// The region covering every element of `shape`.
    pub fn full(shape: &TensorShape) -> Self {
        ValidRegion {
            anchor: smallvec::smallvec![0; shape.num_dimensions()],
            shape: shape.clone(),
        }
    }

    pub fn start(&self, dim: usize) -> i32 {
        self.anchor.get(dim).copied().unwrap_or(0)
    }

    /// One past the last valid coordinate of `dim`, saturating at
    /// `i32::MAX`.
    pub fn end(&self, dim: usize) -> i32 {
        let end = i64::from(self.start(dim)) + i64::from(self.shape.dim(dim));
        i32::try_from(end).unwrap_or(i32::MAX)
    }

    /// Sets dimension `dim` to `[start, start + extent)`.
    pub fn set(&mut self, dim: usize, start: i32, extent: u32) {
        if self.anchor.len() <= dim {
            self.anchor.resize(dim + 1, 0);
        }
        self.anchor[dim] = start;
        self.shape.set(dim, extent);
    }
}

impl Display for ValidRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rank = self.shape.num_dimensions().max(self.anchor.len()).max(1);
        let parts = (0..rank).map(|d| format!("{}:{}", self.start(d), self.end(d)));
        write!(f, "[{}]", join_into_string(parts, ", "))
    }
}

impl TensorInfo {
    pub fn new(shape: TensorShape, data_kind: DataKind) -> Self {
        let mut info = TensorInfo::empty();
        info.init(shape, data_kind);
        info
    }

    /// A descriptor with no shape and no data kind, to be initialized by the
    /// first operation configured to write it.
    pub fn empty() -> Self {
        TensorInfo {
            shape: TensorShape::empty(),
            data_kind: None,
            padding: PaddingSize::default(),
            strides: [0; MAX_DIMS],
            offset_first_element: 0,
            total_size: 0,
            valid_region: ValidRegion::default(),
        }
    }

    /// Initializes the descriptor if it has no shape yet. Returns `true` if it
    /// did.
    pub fn auto_init_if_empty(&mut self, shape: TensorShape, data_kind: DataKind) -> bool {
        if !self.shape.is_empty() {
            return false;
        }
        self.init(shape, data_kind);
        true
    }

    fn init(&mut self, shape: TensorShape, data_kind: DataKind) {
        self.valid_region = ValidRegion::full(&shape);
        self.shape = shape;
        self.data_kind = Some(data_kind);
        self.padding = PaddingSize::default();
        self.update_strides_and_offset();
    }

    /// Grows padding to at least `padding` on every side. Returns `true` if
    /// any side changed.
    pub fn extend_padding(&mut self, padding: PaddingSize) -> bool {
        let grown = self.padding.max(&padding);
        if grown == self.padding {
            return false;
        }
        self.padding = grown;
        self.update_strides_and_offset();
        true
    }

    fn update_strides_and_offset(&mut self) {
        let rank = self.shape.num_dimensions();
        self.strides = [0; MAX_DIMS];
        if rank == 0 {
            self.offset_first_element = 0;
            self.total_size = 0;
            return;
        }

        let p = &self.padding;
        let stride_x = u64::from(self.element_size());
        let stride_y =
            (u64::from(p.left) + u64::from(self.shape.dim(0)) + u64::from(p.right)) * stride_x;
        let stride_z =
            (u64::from(p.top) + u64::from(self.shape.dim(1)) + u64::from(p.bottom)) * stride_y;

        self.strides[0] = stride_x;
        if rank > 1 {
            self.strides[1] = stride_y;
        }
        if rank > 2 {
            self.strides[2] = stride_z;
        }
        for d in 3..rank {
            self.strides[d] = u64::from(self.shape.dim(d - 1)) * self.strides[d - 1];
        }

        self.total_size = if rank <= 2 {
            stride_z
        } else {
            u64::from(self.shape.dim(rank - 1)) * self.strides[rank - 1]
        };
        self.offset_first_element = u64::from(p.left) * stride_x + u64::from(p.top) * stride_y;
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dimension(&self, dim: usize) -> u32 {
        self.shape.dim(dim)
    }

    pub fn num_dimensions(&self) -> usize {
        self.shape.num_dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn data_kind(&self) -> Option<DataKind> {
        self.data_kind
    }

    pub fn element_size(&self) -> u8 {
        self.data_kind.map(|k| k.size()).unwrap_or(0)
    }

    pub fn padding(&self) -> PaddingSize {
        self.padding
    }

    /// Byte strides per dimension. Dimensions at or above the rank have a
    /// stride of 0.
    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn stride(&self, dim: usize) -> u64 {
        self.strides[dim]
    }

    pub fn offset_first_element(&self) -> u64 {
        self.offset_first_element
    }

    /// Bytes of storage required, padding included.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn valid_region(&self) -> &ValidRegion {
        &self.valid_region
    }

    pub fn set_valid_region(&mut self, valid_region: ValidRegion) {
        self.valid_region = valid_region;
    }
}

impl Display for TensorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.data_kind {
            Some(kind) => write!(f, "{}, {}", self.shape, kind),
            None => write!(f, "(uninitialized)"),
        }
    }
}
