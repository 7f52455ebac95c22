use crate::access_window::AccessError;
use crate::backend::{Backend, BackendError};
use crate::common::DataKind;
use crate::tensorinfo::TensorInfo;
use crate::window::{Window, WindowError};

#[derive(thiserror::Error, Debug)]
pub enum ConfigureError {
    #[error("{operand} has no data kind; it must be initialized first")]
    UninitializedOperand { operand: &'static str },
    #[error("{operand} has unsupported data kind {kind}")]
    UnsupportedDataKind {
        operand: &'static str,
        kind: DataKind,
    },
    #[error("{operand} has data kind {actual}, expected {expected}")]
    DataKindMismatch {
        operand: &'static str,
        expected: DataKind,
        actual: DataKind,
    },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{operand} must be prepared before a kernel borrows it")]
    UnpreparedOperand { operand: &'static str },
    #[error("{operand} needs {size} bytes, more than 32-bit offsets can address")]
    TensorTooLarge { operand: &'static str, size: u64 },
    #[error("{operand} yields {actual} slices but the window yields {expected}")]
    SliceCountMismatch {
        operand: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("cannot build program `{program}`")]
    Compile {
        program: String,
        #[source]
        source: BackendError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("kernel has not been configured")]
    Unconfigured,
    #[error("window {window} is not a sub-window of the configured window {configured}")]
    InvalidSubwindow { window: Window, configured: Window },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A configured operation which can be dispatched over its window, or any
/// sub-window of it.
///
/// Operators hold their configuration in an `Option`; `None` until a
/// `configure` call succeeds. Configuration validates everything, compiles,
/// and only then writes padding and valid regions into the operands, so a
/// failed `configure` leaves operands and kernel untouched.
pub trait Kernel<B: Backend> {
    fn name(&self) -> &'static str;

    /// The window fixed by the last successful `configure`.
    fn window(&self) -> Option<&Window>;

    /// Dispatches the slices of `window` to `backend`.
    ///
    /// A backend error part way through is returned as is, but the slices
    /// enqueued before it remain enqueued. The destination then holds partial
    /// results and the run counts as failed.
    fn run(&self, window: &Window, backend: &B) -> Result<(), RunError>;

    fn run_full(&self, backend: &B) -> Result<(), RunError> {
        let window = *self.window().ok_or(RunError::Unconfigured)?;
        self.run(&window, backend)
    }

    fn is_configured(&self) -> bool {
        self.window().is_some()
    }
}

/// Checks that `window` is contained in, and aligned with, `configured`.
pub fn validate_subwindow(configured: &Window, window: &Window) -> Result<(), RunError> {
    if window.is_subwindow_of(configured) {
        Ok(())
    } else {
        Err(RunError::InvalidSubwindow {
            window: *window,
            configured: *configured,
        })
    }
}

/// The data kind of an operand, or an error naming it if it has none.
pub(crate) fn require_kind(
    operand: &'static str,
    info: &TensorInfo,
) -> Result<DataKind, ConfigureError> {
    info.data_kind()
        .ok_or(ConfigureError::UninitializedOperand { operand })
}

/// Fails unless `actual` is one of `supported`.
pub(crate) fn require_supported(
    operand: &'static str,
    actual: DataKind,
    supported: &[DataKind],
) -> Result<(), ConfigureError> {
    if supported.contains(&actual) {
        Ok(())
    } else {
        Err(ConfigureError::UnsupportedDataKind {
            operand,
            kind: actual,
        })
    }
}

pub(crate) fn require_same_kind(
    operand: &'static str,
    expected: DataKind,
    actual: DataKind,
) -> Result<(), ConfigureError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigureError::DataKindMismatch {
            operand,
            expected,
            actual,
        })
    }
}

/// Fails if arguments for `info` could overflow 32-bit offsets.
pub(crate) fn require_addressable(
    operand: &'static str,
    info: &TensorInfo,
) -> Result<(), ConfigureError> {
    let size = info.total_size();
    if size > u64::from(u32::MAX) {
        Err(ConfigureError::TensorTooLarge { operand, size })
    } else {
        Ok(())
    }
}
