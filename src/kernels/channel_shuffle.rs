//! Channel shuffle: splits the channels of a `(W, H, C, ...)` tensor into
//! `groups` groups and interleaves them.

use log::debug;
use nonzero::nonzero as nz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access_window::{update_window_and_padding, AccessWindowHorizontal, BorderPolicy};
use crate::backend::{Backend, KernelArg};
use crate::common::{DataKind, DimSize};
use crate::dispatch::{dispatch_slices, OperandSlicing, SlicedOperand};
use crate::kernel::{
    require_addressable, require_kind, require_same_kind, require_supported, validate_subwindow,
    ConfigureError, Kernel, RunError,
};
use crate::slice::SliceRank;
use crate::specialization::{BuildOptions, ProgramCache};
use crate::tensor::Tensor;
use crate::tensorinfo::TensorInfo;
use crate::window::Window;

pub const PROGRAM: &str = "channel_shuffle";

const ELEMENTS_PER_ITERATION: DimSize = nz!(4u32);
const SUPPORTED_KINDS: [DataKind; 3] = [DataKind::Sint16, DataKind::Float16, DataKind::Float32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ChannelShuffleParams {
    pub groups: u32,
    pub border: BorderPolicy,
}

pub struct ChannelShuffleKernel<'a, B: Backend> {
    configured: Option<Configured<'a, B>>,
}

struct Configured<'a, B: Backend> {
    input: &'a Tensor<B::Buffer>,
    output: &'a Tensor<B::Buffer>,
    window: Window,
    program: Arc<B::Program>,
    channels: i32,
    groups: i32,
}

/// Everything `configure` would commit, computed without touching the
/// operands.
struct Plan {
    input: TensorInfo,
    output: TensorInfo,
    window: Window,
    options: BuildOptions,
    channels: i32,
    groups: i32,
}

impl ChannelShuffleParams {
    pub fn new(groups: u32) -> Self {
        ChannelShuffleParams {
            groups,
            border: BorderPolicy::default(),
        }
    }
}

impl<'a, B: Backend> ChannelShuffleKernel<'a, B> {
    pub fn new() -> Self {
        ChannelShuffleKernel { configured: None }
    }

    /// Checks whether `configure` would succeed for these operands, short of
    /// compiling the program.
    pub fn validate(
        input: &TensorInfo,
        output: &TensorInfo,
        params: &ChannelShuffleParams,
    ) -> Result<(), ConfigureError> {
        plan(input, output, params).map(|_| ())
    }

    /// Prepares the kernel to shuffle `input` into `output`.
    ///
    /// `output` is initialized from `input` if it has no shape yet. On
    /// success both operands' padding and `output`'s valid region are
    /// updated, and the kernel borrows both for as long as it lives. On
    /// failure neither operand nor the kernel is changed.
    ///
    /// Since the operands stay mutably borrowed, a tensor configured here
    /// can't also be bound to another kernel. Use [Self::prepare] and
    /// [Self::configure_prepared] for tensors shared between kernels.
    pub fn configure(
        &mut self,
        backend: &B,
        cache: &ProgramCache<B::Program>,
        input: &'a mut Tensor<B::Buffer>,
        output: &'a mut Tensor<B::Buffer>,
        params: &ChannelShuffleParams,
    ) -> Result<(), ConfigureError> {
        let plan = plan(input.info(), output.info(), params)?;
        let program = compile(backend, cache, &plan)?;
        *input.info_mut() = plan.input.clone();
        *output.info_mut() = plan.output.clone();
        self.bind(input, output, plan, program);
        Ok(())
    }

    /// Commits the padding and valid region `configure` would, without
    /// binding a kernel to the operands. On failure neither is changed.
    pub fn prepare(
        input: &mut TensorInfo,
        output: &mut TensorInfo,
        params: &ChannelShuffleParams,
    ) -> Result<(), ConfigureError> {
        let plan = plan(input, output, params)?;
        *input = plan.input;
        *output = plan.output;
        Ok(())
    }

    /// Like [Self::configure], but only borrows the operands, which must
    /// already have been through [Self::prepare].
    ///
    /// Kernels chained through a shared tensor are prepared in order first,
    /// then configured here. Fails with
    /// [ConfigureError::UnpreparedOperand] if an operand still needs
    /// initialization or padding.
    pub fn configure_prepared(
        &mut self,
        backend: &B,
        cache: &ProgramCache<B::Program>,
        input: &'a Tensor<B::Buffer>,
        output: &'a Tensor<B::Buffer>,
        params: &ChannelShuffleParams,
    ) -> Result<(), ConfigureError> {
        let plan = plan(input.info(), output.info(), params)?;
        require_prepared("input", input.info(), &plan.input)?;
        require_prepared("output", output.info(), &plan.output)?;
        let program = compile(backend, cache, &plan)?;
        self.bind(input, output, plan, program);
        Ok(())
    }

    fn bind(
        &mut self,
        input: &'a Tensor<B::Buffer>,
        output: &'a Tensor<B::Buffer>,
        plan: Plan,
        program: Arc<B::Program>,
    ) {
        debug!(
            "Configured {} over {} with {}; input padding {}, output padding {}",
            PROGRAM,
            plan.window,
            plan.options,
            plan.input.padding(),
            plan.output.padding()
        );
        self.configured = Some(Configured {
            input,
            output,
            window: plan.window,
            program,
            channels: plan.channels,
            groups: plan.groups,
        });
    }

    pub fn program(&self) -> Option<&Arc<B::Program>> {
        self.configured.as_ref().map(|c| &c.program)
    }
}

fn plan(
    input: &TensorInfo,
    output: &TensorInfo,
    params: &ChannelShuffleParams,
) -> Result<Plan, ConfigureError> {
    let kind = require_kind("input", input)?;
    require_supported("input", kind, &SUPPORTED_KINDS)?;

    if params.groups == 0 {
        return Err(ConfigureError::InvalidParameter(
            "groups must be at least 1".to_string(),
        ));
    }
    let channels = input.dimension(2);
    if channels % params.groups != 0 {
        return Err(ConfigureError::ShapeMismatch(format!(
            "{} channels cannot be split into {} groups",
            channels, params.groups
        )));
    }

    let mut output = output.clone();
    output.auto_init_if_empty(input.shape().clone(), kind);
    let output_kind = require_kind("output", &output)?;
    require_same_kind("output", kind, output_kind)?;
    if output.shape() != input.shape() {
        return Err(ConfigureError::ShapeMismatch(format!(
            "output shape {} differs from input shape {}",
            output.shape(),
            input.shape()
        )));
    }

    let mut options = BuildOptions::new();
    options.add_define("DATA_TYPE", kind.kernel_type_name());

    let mut input = input.clone();
    let input_valid_region = input.valid_region().clone();
    let mut window = Window::build_over(&input_valid_region, &[ELEMENTS_PER_ITERATION])?;
    let width = ELEMENTS_PER_ITERATION.get();
    let mut input_access = AccessWindowHorizontal::new(&mut input, 0, width, params.border);
    let mut output_access = AccessWindowHorizontal::new(&mut output, 0, width, params.border);
    update_window_and_padding(&mut window, &mut [&mut input_access, &mut output_access])?;
    output_access.set_valid_region(&window, &input_valid_region);

    require_addressable("input", &input)?;
    require_addressable("output", &output)?;

    Ok(Plan {
        input,
        output,
        window,
        options,
        channels: to_int_param("channels", channels)?,
        groups: to_int_param("groups", params.groups)?,
    })
}

fn compile<B: Backend>(
    backend: &B,
    cache: &ProgramCache<B::Program>,
    plan: &Plan,
) -> Result<Arc<B::Program>, ConfigureError> {
    cache
        .get_or_compile(backend, PROGRAM, &plan.options)
        .map_err(|source| ConfigureError::Compile {
            program: PROGRAM.to_string(),
            source,
        })
}

fn require_prepared(
    operand: &'static str,
    actual: &TensorInfo,
    planned: &TensorInfo,
) -> Result<(), ConfigureError> {
    if actual == planned {
        Ok(())
    } else {
        Err(ConfigureError::UnpreparedOperand { operand })
    }
}

fn to_int_param(name: &str, value: u32) -> Result<i32, ConfigureError> {
    i32::try_from(value)
        .map_err(|_| ConfigureError::InvalidParameter(format!("{name} ({value}) is too large")))
}

impl<B: Backend> Default for ChannelShuffleKernel<'_, B> {
    fn default() -> Self {
        ChannelShuffleKernel::new()
    }
}

impl<'a, B: Backend> Kernel<B> for ChannelShuffleKernel<'a, B> {
    fn name(&self) -> &'static str {
        PROGRAM
    }

    fn window(&self) -> Option<&Window> {
        self.configured.as_ref().map(|c| &c.window)
    }

    fn run(&self, window: &Window, backend: &B) -> Result<(), RunError> {
        let c = self.configured.as_ref().ok_or(RunError::Unconfigured)?;
        validate_subwindow(&c.window, window)?;

        let operands = [
            SlicedOperand::new(
                c.input,
                OperandSlicing::new("input", *window, SliceRank::Three),
            ),
            SlicedOperand::new(
                c.output,
                OperandSlicing::new("output", *window, SliceRank::Three),
            ),
        ];
        let scalars = [KernelArg::Int(c.channels), KernelArg::Int(c.groups)];
        let submitted = dispatch_slices(
            backend,
            &*c.program,
            window,
            SliceRank::Three,
            &operands,
            &scalars,
        )?;
        debug!("Ran {} over {} in {} launches", PROGRAM, window, submitted);
        Ok(())
    }
}
