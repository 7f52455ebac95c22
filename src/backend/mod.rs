//! The device runtime this crate dispatches to.
//!
//! A [Backend] compiles named programs, binds arguments to them, and accepts
//! enqueued work. Everything above this module depends only on the trait.

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

use crate::specialization::BuildOptions;
use crate::window::Window;

pub mod recording;

/// One argument bound to a compiled program.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum KernelArg<Buf> {
    Buffer(Buf),
    Int(i32),
    Uint(u32),
    Float(f32),
}

/// The number of work items in each of the three launch dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DispatchExtent {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to compile program `{program}`: {reason}")]
    Compile { program: String, reason: String },
    #[error("failed to bind argument {index}: {reason}")]
    Bind { index: u32, reason: String },
    #[error("queue rejected work: {0}")]
    Rejected(String),
}

#[auto_impl(&, Box, Arc)]
pub trait Backend {
    type Program: Debug;
    type Buffer: Clone + Debug + PartialEq;

    fn compile(&self, name: &str, options: &BuildOptions) -> Result<Self::Program, BackendError>;

    fn bind_argument(
        &self,
        program: &Self::Program,
        index: u32,
        arg: KernelArg<Self::Buffer>,
    ) -> Result<(), BackendError>;

    /// Submits one launch of `program` with its currently bound arguments.
    /// Does not wait for the device.
    fn enqueue(&self, program: &Self::Program, extent: DispatchExtent) -> Result<(), BackendError>;
}

impl DispatchExtent {
    /// The launch extent of one slice: the iteration count of its first
    /// three dimensions.
    pub fn of_slice(slice: &Window) -> Self {
        DispatchExtent {
            x: slice.num_iterations(0),
            y: slice.num_iterations(1),
            z: slice.num_iterations(2),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    pub fn volume(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

impl Display for DispatchExtent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}×{}", self.x, self.y, self.z)
    }
}

impl<Buf: Display> Display for KernelArg<Buf> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelArg::Buffer(b) => write!(f, "{b}"),
            KernelArg::Int(v) => write!(f, "{v}"),
            KernelArg::Uint(v) => write!(f, "{v}u"),
            KernelArg::Float(v) => write!(f, "{v:?}f"),
        }
    }
}
