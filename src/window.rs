use nonzero::nonzero as nz;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::common::{DimSize, MAX_DIMS};
use crate::tensorinfo::ValidRegion;
use crate::utils::{join_into_string, round_up};

/// One dimension of a [Window]: the half-open range `[start, end)` visited
/// in increments of `step`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub struct Dimension {
    start: i32,
    end: i32,
    step: DimSize,
}

/// An iteration space of up to [MAX_DIMS] dimensions.
///
/// Dimensions not otherwise set are `[0, 1)` with a step of 1, so a window
/// over a low-rank tensor composes with higher-rank batch dimensions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub struct Window {
    dims: [Dimension; MAX_DIMS],
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("cannot build a window over a rank-0 shape")]
    EmptyShape,
    #[error("dimension {0} has zero extent")]
    ZeroExtent(usize),
    #[error("dimension {dim} ends ({end}) before it starts ({start})")]
    InvertedDimension { dim: usize, start: i32, end: i32 },
    #[error("dimension {dim} spans {span}, which is not a multiple of its step {step}")]
    MisalignedDimension { dim: usize, span: i64, step: DimSize },
    #[error("dimension {dim} of extent {extent} does not fit a window")]
    ExtentTooLarge { dim: usize, extent: u32 },
}

impl Dimension {
    pub fn new(start: i32, end: i32, step: DimSize) -> Self {
        Dimension { start, end, step }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn step(&self) -> DimSize {
        self.step
    }

    pub(crate) fn step_i64(&self) -> i64 {
        i64::from(self.step.get())
    }

    /// The end of the step which begins at `start`, limited to the end of the
    /// dimension.
    pub(crate) fn step_end(&self, start: i32) -> i32 {
        let end = i64::from(start) + self.step_i64();
        i32::try_from(end).map_or(self.end, |e| e.min(self.end))
    }

    /// The number of steps needed to cover the dimension. Includes a final,
    /// partial step, if any.
    pub fn num_iterations(&self) -> u32 {
        if self.end <= self.start {
            return 0;
        }
        divrem::DivCeil::div_ceil(self.end.abs_diff(self.start), self.step.get())
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Dimension::new(0, 1, nz!(1u32))
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.step)
    }
}

impl Window {
    pub fn new() -> Self {
        Window {
            dims: [Dimension::default(); MAX_DIMS],
        }
    }

    /// Builds the largest window over a tensor of `shape` which steps each
    /// dimension by the corresponding entry of `steps` (default 1).
    ///
    /// Each dimension's end is rounded up to a multiple of its step, so the
    /// window may overrun the tensor by up to `step - 1` elements. Access
    /// windows decide whether that overrun is padded or clipped.
    pub fn build(shape: &crate::shape::TensorShape, steps: &[DimSize]) -> Result<Self, WindowError> {
        Window::build_over(&ValidRegion::full(shape), steps)
    }

    /// Like [Window::build], but over a tensor's valid region.
    pub fn build_over(region: &ValidRegion, steps: &[DimSize]) -> Result<Self, WindowError> {
        let rank = region.shape.num_dimensions();
        if rank == 0 {
            return Err(WindowError::EmptyShape);
        }
        let mut window = Window::new();
        for d in 0..rank {
            let extent = region.shape.dim(d);
            if extent == 0 {
                return Err(WindowError::ZeroExtent(d));
            }
            let step = steps.get(d).copied().unwrap_or(nz!(1u32));
            let start = region.start(d);
            let end = round_up(extent, step.get())
                .and_then(|span| i32::try_from(span).ok())
                .and_then(|span| start.checked_add(span))
                .ok_or(WindowError::ExtentTooLarge { dim: d, extent })?;
            window.dims[d] = Dimension::new(start, end, step);
        }
        Ok(window)
    }

    pub fn dim(&self, dim: usize) -> &Dimension {
        &self.dims[dim]
    }

    pub fn dims(&self) -> &[Dimension; MAX_DIMS] {
        &self.dims
    }

    pub fn set(&mut self, dim: usize, dimension: Dimension) {
        self.dims[dim] = dimension;
    }

    pub fn x(&self) -> &Dimension {
        &self.dims[0]
    }

    pub fn y(&self) -> &Dimension {
        &self.dims[1]
    }

    pub fn z(&self) -> &Dimension {
        &self.dims[2]
    }

    pub fn num_iterations(&self, dim: usize) -> u32 {
        self.dims[dim].num_iterations()
    }

    /// Total steps across all dimensions.
    pub fn total_iterations(&self) -> u64 {
        self.dims
            .iter()
            .map(|d| u64::from(d.num_iterations()))
            .product()
    }

    /// Returns a copy which takes dimensions below `first_dim` from `self` and
    /// the rest from `outer`.
    pub fn with_outer_dims_of(&self, outer: &Window, first_dim: usize) -> Window {
        let mut result = *self;
        result.dims[first_dim..].copy_from_slice(&outer.dims[first_dim..]);
        result
    }

    /// Checks that every dimension is non-inverted and spans a whole number
    /// of steps.
    pub fn validate(&self) -> Result<(), WindowError> {
        for (dim, d) in self.dims.iter().enumerate() {
            if d.end < d.start {
                return Err(WindowError::InvertedDimension {
                    dim,
                    start: d.start,
                    end: d.end,
                });
            }
            let span = i64::from(d.end) - i64::from(d.start);
            if span % d.step_i64() != 0 {
                return Err(WindowError::MisalignedDimension {
                    dim,
                    span,
                    step: d.step,
                });
            }
        }
        Ok(())
    }

    /// Returns `true` if `self` lies within `full` and visits only points
    /// `full` visits.
    pub fn is_subwindow_of(&self, full: &Window) -> bool {
        self.dims.iter().zip(&full.dims).all(|(w, f)| {
            f.start <= w.start
                && w.end <= f.end
                && w.step == f.step
                && (i64::from(w.start) - i64::from(f.start)) % f.step_i64() == 0
        })
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::new()
    }
}

impl Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self
            .dims
            .iter()
            .rposition(|d| *d != Dimension::default())
            .map_or(1, |i| i + 1);
        write!(f, "[{}]", join_into_string(&self.dims[..used], ", "))
    }
}
