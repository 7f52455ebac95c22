//! Binding per-slice arguments and submitting slices to a [Backend].

use log::{trace, warn};

use crate::backend::{Backend, BackendError, DispatchExtent, KernelArg};
use crate::kernel::ConfigureError;
use crate::slice::{SliceCursor, SliceRank};
use crate::tensor::Tensor;
use crate::window::Window;

/// The number of program arguments one tensor of `rank` occupies: its
/// buffer, a stride and a step stride per dimension, and its offset.
pub fn num_arguments_per_tensor(rank: SliceRank) -> u32 {
    2 + 2 * u32::try_from(rank.get()).unwrap()
}

/// Binds arguments to a program in declaration order.
pub struct ArgumentList<'p, B: Backend> {
    backend: &'p B,
    program: &'p B::Program,
    next_index: u32,
}

/// The window an operand's slices are taken from, and their rank.
///
/// The dispatcher advances every operand's cursor in lock-step with the
/// launch window, so each operand window must have as many slices as the
/// launch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandSlicing {
    pub name: &'static str,
    pub window: Window,
    pub rank: SliceRank,
}

/// A tensor bound to its [OperandSlicing].
#[derive(Debug)]
pub struct SlicedOperand<'t, Buf> {
    pub tensor: &'t Tensor<Buf>,
    pub slicing: OperandSlicing,
}

impl<'p, B: Backend> ArgumentList<'p, B> {
    pub fn new(backend: &'p B, program: &'p B::Program) -> Self {
        ArgumentList {
            backend,
            program,
            next_index: 0,
        }
    }

    /// The index the next argument will be bound to.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn add(&mut self, arg: KernelArg<B::Buffer>) -> Result<(), BackendError> {
        self.backend.bind_argument(self.program, self.next_index, arg)?;
        self.next_index += 1;
        Ok(())
    }

    /// Binds `tensor` as seen through `slice`: its buffer, then a stride and
    /// a per-step stride for each of the first `rank` dimensions, then the
    /// byte offset of the slice's first element.
    pub fn add_tensor(
        &mut self,
        tensor: &Tensor<B::Buffer>,
        slice: &Window,
        rank: SliceRank,
    ) -> Result<(), BackendError> {
        let info = tensor.info();
        self.add(KernelArg::Buffer(tensor.buffer().clone()))?;
        for d in 0..rank.get() {
            let stride = info.stride(d);
            self.add(KernelArg::Uint(to_u32(stride)))?;
            self.add(KernelArg::Uint(to_u32(
                stride * u64::from(slice.dim(d).step().get()),
            )))?;
        }
        self.add(KernelArg::Uint(to_u32(slice_offset(tensor, slice))))
    }
}

/// The byte offset of the element at the start of `slice`.
pub fn slice_offset<Buf>(tensor: &Tensor<Buf>, slice: &Window) -> u64 {
    let info = tensor.info();
    let offset = info.offset_first_element() as i64
        + slice
            .dims()
            .iter()
            .zip(info.strides())
            .map(|(d, &stride)| i64::from(d.start()) * stride as i64)
            .sum::<i64>();
    u64::try_from(offset).expect("slice starts before the tensor's storage")
}

// Operand storage sizes are checked against `u32` when a kernel is
// configured, so every stride and in-window offset fits.
fn to_u32(v: u64) -> u32 {
    u32::try_from(v).expect("argument exceeds 32 bits")
}

impl OperandSlicing {
    pub fn new(name: &'static str, window: Window, rank: SliceRank) -> Self {
        OperandSlicing { name, window, rank }
    }

    pub fn num_slices(&self) -> u64 {
        self.window.num_slices(self.rank)
    }
}

impl<'t, Buf> SlicedOperand<'t, Buf> {
    pub fn new(tensor: &'t Tensor<Buf>, slicing: OperandSlicing) -> Self {
        SlicedOperand { tensor, slicing }
    }
}

/// Fails if any operand's window yields a different number of slices than
/// `window` does at `rank`.
pub fn check_lockstep(
    window: &Window,
    rank: SliceRank,
    slicings: &[OperandSlicing],
) -> Result<(), ConfigureError> {
    let expected = window.num_slices(rank);
    for slicing in slicings {
        let actual = slicing.num_slices();
        if actual != expected {
            return Err(ConfigureError::SliceCountMismatch {
                operand: slicing.name,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Submits one launch of `program` per slice of `window`.
///
/// For each slice, binds every operand (in order) at its own cursor's
/// current slice, then `scalars`, then enqueues. Slices whose extent is empty
/// are skipped. Returns the number of launches submitted.
///
/// Panics if the operands' cursors run out at different times; the operands'
/// windows were built to have equal slice counts.
///
/// Stops at the first bind or enqueue error and returns it. Launches
/// enqueued before the failing slice stay enqueued, since a [Backend] has no
/// way to withdraw them, so the destination may be partly written. Treat
/// the whole run as failed.
pub fn dispatch_slices<B: Backend>(
    backend: &B,
    program: &B::Program,
    window: &Window,
    rank: SliceRank,
    operands: &[SlicedOperand<'_, B::Buffer>],
    scalars: &[KernelArg<B::Buffer>],
) -> Result<usize, BackendError> {
    let mut launch = SliceCursor::new(*window, rank);
    if launch.num_slices() == 0 {
        warn!("Window {} has no {} slices; nothing to dispatch", window, rank);
        return Ok(0);
    }
    let mut cursors = operands
        .iter()
        .map(|op| SliceCursor::new(op.slicing.window, op.slicing.rank))
        .collect::<Vec<_>>();
    for (op, cursor) in operands.iter().zip(&cursors) {
        assert_eq!(
            cursor.num_slices(),
            launch.num_slices(),
            "operand {} is not in lock-step with the launch window",
            op.slicing.name
        );
    }

    let mut submitted = 0;
    loop {
        let extent = DispatchExtent::of_slice(launch.current());
        if extent.is_empty() {
            warn!("Skipping empty slice {}", launch.current());
        } else {
            let mut args = ArgumentList::new(backend, program);
            for (op, cursor) in operands.iter().zip(&cursors) {
                args.add_tensor(op.tensor, cursor.current(), op.slicing.rank)?;
            }
            for scalar in scalars {
                args.add(scalar.clone())?;
            }
            backend.enqueue(program, extent)?;
            trace!("Enqueued slice {} with extent {}", launch.current(), extent);
            submitted += 1;
        }

        let more = launch.advance();
        for (op, cursor) in operands.iter().zip(cursors.iter_mut()) {
            let operand_more = cursor.advance();
            assert_eq!(
                operand_more, more,
                "slice cursor of {} disagrees with the launch window",
                op.slicing.name
            );
        }
        if !more {
            break;
        }
    }
    Ok(submitted)
}
