//! Per-operand access footprints.
//!
//! An [AccessWindow] describes which elements of one tensor a kernel touches
//! as it steps through a [Window]. Configuring an operation runs every
//! operand's access window against a shared window (see
//! [update_window_and_padding]): first each access may shrink the window, then
//! each access extends its tensor's padding to cover what remains.

use serde::{Deserialize, Serialize};

use crate::tensorinfo::{PaddingSize, TensorInfo, ValidRegion};
use crate::utils::{adjust_down, adjust_up};
use crate::window::{Dimension, Window, WindowError};

/// What a horizontal access does when a step would run past the tensor.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum,
)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum BorderPolicy {
    /// Grow the tensor's padding so every step fits.
    #[default]
    Pad,
    /// Leave padding alone and shrink the window to what fits.
    Clip,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error(
        "static access [{min_x}, {max_x}) x [{min_y}, {max_y}) exceeds the {extent_x}x{extent_y} \
         tensor and its padding ({padding})"
    )]
    InvalidRegion {
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
        extent_x: u32,
        extent_y: u32,
        padding: PaddingSize,
    },
    #[error("access left an invalid window: {0}")]
    InvalidWindow(#[from] WindowError),
}

pub trait AccessWindow {
    /// Shrinks `window` so that the access stays inside the tensor and the
    /// padding it already has. Returns `true` if `window` changed.
    fn update_window_if_needed(&self, window: &mut Window) -> bool;

    /// Ensures the tensor can serve the access over all of `window`. Returns
    /// `true` if the tensor's padding changed.
    fn update_padding_if_needed(&mut self, window: &Window) -> Result<bool, AccessError>;
}

/// Touches `width` elements starting `x` elements after each step of window
/// dimension 0 (scaled by `scale_x`), in a single row.
#[derive(Debug)]
pub struct AccessWindowHorizontal<'a> {
    info: &'a mut TensorInfo,
    x: i64,
    width: i64,
    scale_x: i64,
    policy: BorderPolicy,
}

/// Touches the fixed rectangle `[min_x, max_x) x [min_y, max_y)` no matter
/// where the window is. Never pads.
#[derive(Debug)]
pub struct AccessWindowStatic<'a> {
    info: &'a TensorInfo,
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

/// The `[min, max)` range touched along one axis. Wider than a window
/// coordinate, since offsets and padding push it past the window's range.
struct Span {
    min: i64,
    max: i64,
}

impl<'a> AccessWindowHorizontal<'a> {
    pub fn new(info: &'a mut TensorInfo, x: i32, width: u32, policy: BorderPolicy) -> Self {
        Self::with_scale(info, x, width, 1, policy)
    }

    pub fn with_scale(
        info: &'a mut TensorInfo,
        x: i32,
        width: u32,
        scale_x: u32,
        policy: BorderPolicy,
    ) -> Self {
        assert!(scale_x > 0, "scale_x must be positive");
        AccessWindowHorizontal {
            info,
            x: i64::from(x),
            width: i64::from(width),
            scale_x: i64::from(scale_x),
            policy,
        }
    }

    fn span_x(&self, window: &Window) -> Span {
        let d = window.x();
        Span {
            min: i64::from(d.start()) * self.scale_x + self.x,
            max: (i64::from(d.end()) - d.step_i64()) * self.scale_x + self.x + self.width,
        }
    }

    fn span_y(window: &Window) -> Span {
        let d = window.y();
        Span {
            min: i64::from(d.start()),
            max: i64::from(d.end()) - d.step_i64() + 1,
        }
    }

    /// Records the region of the tensor which `window` fully computes.
    ///
    /// Dimensions 0 and 1 are what the window writes, limited to
    /// `input_valid_region`. Higher dimensions are the intersection of the
    /// window and `input_valid_region`.
    pub fn set_valid_region(&mut self, window: &Window, input_valid_region: &ValidRegion) {
        let mut region = input_valid_region.clone();

        let sx = self.span_x(window);
        let start_x = (i64::from(window.x().start()) * self.scale_x)
            .max(i64::from(input_valid_region.start(0)))
            + self.x;
        let end_x = i64::from(input_valid_region.end(0)).min(sx.max);
        set_range(&mut region, 0, start_x, end_x);

        let sy = Self::span_y(window);
        let start_y = sy.min.max(i64::from(input_valid_region.start(1)));
        let end_y = i64::from(input_valid_region.end(1)).min(sy.max);
        set_range(&mut region, 1, start_y, end_y);

        for d in 2..self.info.num_dimensions() {
            let dim = window.dim(d);
            let start = dim.start().max(input_valid_region.start(d));
            let end = dim.end().min(input_valid_region.end(d));
            region.set(d, start, clamped_extent(start, end));
        }

        self.info.set_valid_region(region);
    }
}

fn clamped_extent(start: i32, end: i32) -> u32 {
    if end > start {
        end.abs_diff(start)
    } else {
        0
    }
}

/// Narrows a span coordinate to a window coordinate, saturating at the
/// bounds of `i32`.
fn narrow(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })
}

fn set_range(region: &mut ValidRegion, dim: usize, start: i64, end: i64) {
    let start = narrow(start);
    region.set(dim, start, clamped_extent(start, narrow(end)));
}

impl AccessWindow for AccessWindowHorizontal<'_> {
    fn update_window_if_needed(&self, window: &mut Window) -> bool {
        if self.policy == BorderPolicy::Pad || window.x().is_empty() || window.y().is_empty() {
            return false;
        }

        let padding = self.info.padding();
        let mut changed = false;

        // Rows: the access is one row tall, so only the window's own extent
        // can overrun.
        let y = *window.y();
        let y_step = y.step_i64();
        let sy = Self::span_y(window);
        let mut start_y = i64::from(y.start());
        let mut end_y = i64::from(y.end());
        let top_available = -i64::from(padding.top);
        if sy.min < top_available {
            start_y = adjust_up(sy.min, top_available, y_step).min(end_y);
        }
        let rows_available = i64::from(self.info.dimension(1)) + i64::from(padding.bottom);
        if sy.max > rows_available {
            end_y = (adjust_down(sy.max, rows_available, y_step) + y_step - 1).max(start_y);
        }
        if (start_y, end_y) != (i64::from(y.start()), i64::from(y.end())) {
            window.set(1, Dimension::new(narrow(start_y), narrow(end_y), y.step()));
            changed = true;
        }

        let x = *window.x();
        let sx = self.span_x(window);
        let scaled_step = x.step_i64() * self.scale_x;
        let mut start_x = i64::from(x.start());
        let mut end_x = i64::from(x.end());
        let left_available = -i64::from(padding.left);
        if sx.min < left_available {
            let start = adjust_up(sx.min, left_available, scaled_step) - self.x;
            start_x = (start / self.scale_x).min(end_x);
        }
        let columns_available = i64::from(self.info.dimension(0)) + i64::from(padding.right);
        if sx.max > columns_available {
            let end = adjust_down(sx.max, columns_available, scaled_step) + scaled_step
                - self.x
                - self.width;
            end_x = (end / self.scale_x).max(start_x);
        }
        if (start_x, end_x) != (i64::from(x.start()), i64::from(x.end())) {
            window.set(0, Dimension::new(narrow(start_x), narrow(end_x), x.step()));
            changed = true;
        }

        changed
    }

    fn update_padding_if_needed(&mut self, window: &Window) -> Result<bool, AccessError> {
        if self.policy == BorderPolicy::Clip || window.x().is_empty() || window.y().is_empty() {
            return Ok(false);
        }

        let sx = self.span_x(window);
        let sy = Self::span_y(window);
        // Padding this large can't be addressed anyway; configure rejects
        // the tensor as too large.
        let overrun = |amount: i64| u32::try_from(amount.max(0)).unwrap_or(u32::MAX);
        let extent_x = i64::from(self.info.dimension(0));
        let extent_y = i64::from(self.info.dimension(1));
        let required = PaddingSize {
            top: overrun(-sy.min),
            right: overrun(sx.max - extent_x),
            bottom: overrun(sy.max - extent_y),
            left: overrun(-sx.min),
        };
        let changed = self.info.extend_padding(required);
        if changed {
            log::debug!(
                "Horizontal access ({}, {}) padded tensor to {}",
                self.x,
                self.width,
                self.info.padding()
            );
        }
        Ok(changed)
    }
}

impl<'a> AccessWindowStatic<'a> {
    pub fn new(info: &'a TensorInfo, min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        AccessWindowStatic {
            info,
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The valid region a tensor written through this access would have: the
    /// footprint, limited to `input_valid_region`.
    pub fn compute_valid_region(&self, input_valid_region: &ValidRegion) -> ValidRegion {
        let mut region = input_valid_region.clone();
        let start_x = self.min_x.max(input_valid_region.start(0));
        let end_x = self.max_x.min(input_valid_region.end(0));
        region.set(0, start_x, clamped_extent(start_x, end_x));
        let start_y = self.min_y.max(input_valid_region.start(1));
        let end_y = self.max_y.min(input_valid_region.end(1));
        region.set(1, start_y, clamped_extent(start_y, end_y));
        region
    }
}

impl AccessWindow for AccessWindowStatic<'_> {
    fn update_window_if_needed(&self, _window: &mut Window) -> bool {
        false
    }

    fn update_padding_if_needed(&mut self, _window: &Window) -> Result<bool, AccessError> {
        let padding = self.info.padding();
        let extent_x = self.info.dimension(0);
        let extent_y = self.info.dimension(1);
        let fits = i64::from(self.min_x) >= -i64::from(padding.left)
            && i64::from(self.min_y) >= -i64::from(padding.top)
            && i64::from(self.max_x) <= i64::from(extent_x) + i64::from(padding.right)
            && i64::from(self.max_y) <= i64::from(extent_y) + i64::from(padding.bottom);
        if fits {
            Ok(false)
        } else {
            Err(AccessError::InvalidRegion {
                min_x: self.min_x,
                min_y: self.min_y,
                max_x: self.max_x,
                max_y: self.max_y,
                extent_x,
                extent_y,
                padding,
            })
        }
    }
}

/// Applies every access to `window`, then validates the result.
///
/// Every access first gets a chance to shrink the window, so the window ends
/// up limited by the most restrictive operand. Only then does each access
/// pad its tensor for the final window. Returns `true` if the window or any
/// padding changed.
pub fn update_window_and_padding(
    window: &mut Window,
    accesses: &mut [&mut dyn AccessWindow],
) -> Result<bool, AccessError> {
    let mut changed = false;
    for access in accesses.iter() {
        changed |= access.update_window_if_needed(window);
    }
    for access in accesses.iter_mut() {
        changed |= access.update_padding_if_needed(window)?;
    }
    window.validate()?;
    Ok(changed)
}
