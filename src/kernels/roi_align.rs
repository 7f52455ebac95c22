//! Region-of-interest align: pools each of `N` regions of a `(W, H, C)`
//! feature map into a `(pooled_width, pooled_height, C)` block of the output.
//!
//! Regions are rows of a `(5, N)` tensor (batch index then two corners). Every
//! region reads whole planes of the feature map, so the input slice spans the
//! full `(W, H)` plane, follows the launch's channels, and is broadcast along
//! the region dimension.

use log::debug;
use nonzero::nonzero as nz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access_window::{
    update_window_and_padding, AccessWindowHorizontal, AccessWindowStatic, BorderPolicy,
};
use crate::backend::Backend;
use crate::common::{DataKind, DimSize};
use crate::dispatch::{check_lockstep, dispatch_slices, OperandSlicing, SlicedOperand};
use crate::kernel::{
    require_addressable, require_kind, require_same_kind, require_supported, validate_subwindow,
    ConfigureError, Kernel, RunError,
};
use crate::shape::TensorShape;
use crate::slice::SliceRank;
use crate::specialization::{BuildOptions, ProgramCache};
use crate::tensor::Tensor;
use crate::tensorinfo::{TensorInfo, ValidRegion};
use crate::utils::float_to_string;
use crate::window::{Dimension, Window};

pub const PROGRAM: &str = "roi_align";

/// Values per region row: batch index, x1, y1, x2, y2.
const ROI_VALUES: u32 = 5;
const CHANNEL_DIM: usize = 2;
const ROI_DIM: usize = 3;
const SUPPORTED_KINDS: [DataKind; 2] = [DataKind::Float16, DataKind::Float32];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RoiAlignParams {
    pub spatial_scale: f32,
    pub pooled_width: u32,
    pub pooled_height: u32,
    /// Sample points per bin along each axis. 0 picks a count adaptively
    /// from each region's size.
    pub sampling_ratio: u32,
    pub border: BorderPolicy,
}

pub struct RoiAlignKernel<'a, B: Backend> {
    configured: Option<Configured<'a, B>>,
}

struct Configured<'a, B: Backend> {
    input: &'a Tensor<B::Buffer>,
    rois: &'a Tensor<B::Buffer>,
    output: &'a Tensor<B::Buffer>,
    window: Window,
    input_window: Window,
    program: Arc<B::Program>,
}

struct Plan {
    output: TensorInfo,
    window: Window,
    input_window: Window,
    options: BuildOptions,
}

impl RoiAlignParams {
    pub fn new(spatial_scale: f32, pooled_width: u32, pooled_height: u32) -> Self {
        RoiAlignParams {
            spatial_scale,
            pooled_width,
            pooled_height,
            sampling_ratio: 0,
            border: BorderPolicy::default(),
        }
    }
}

/// The number of output elements each work item produces.
pub fn elements_per_iteration(kind: DataKind) -> DimSize {
    match kind {
        DataKind::Float16 => nz!(4u32),
        _ => nz!(1u32),
    }
}

impl<'a, B: Backend> RoiAlignKernel<'a, B> {
    pub fn new() -> Self {
        RoiAlignKernel { configured: None }
    }

    pub fn validate(
        input: &TensorInfo,
        rois: &TensorInfo,
        output: &TensorInfo,
        params: &RoiAlignParams,
    ) -> Result<(), ConfigureError> {
        plan(input, rois, output, params).map(|_| ())
    }

    /// Prepares the kernel to pool the regions in `rois` out of `input`.
    ///
    /// `output` is initialized to `(pooled_width, pooled_height, C, N)` if it
    /// has no shape yet. Only `output` is modified: its padding (under
    /// `params.border`) and valid region. `input` and `rois` must already
    /// cover what is read from them.
    pub fn configure(
        &mut self,
        backend: &B,
        cache: &ProgramCache<B::Program>,
        input: &'a Tensor<B::Buffer>,
        rois: &'a Tensor<B::Buffer>,
        output: &'a mut Tensor<B::Buffer>,
        params: &RoiAlignParams,
    ) -> Result<(), ConfigureError> {
        let plan = plan(input.info(), rois.info(), output.info(), params)?;
        let program = cache
            .get_or_compile(backend, PROGRAM, &plan.options)
            .map_err(|source| ConfigureError::Compile {
                program: PROGRAM.to_string(),
                source,
            })?;

        debug!(
            "Configured {} over {} with {}; output padding {}",
            PROGRAM,
            plan.window,
            plan.options,
            plan.output.padding()
        );
        *output.info_mut() = plan.output;
        self.configured = Some(Configured {
            input,
            rois,
            output,
            window: plan.window,
            input_window: plan.input_window,
            program,
        });
        Ok(())
    }

    pub fn program(&self) -> Option<&Arc<B::Program>> {
        self.configured.as_ref().map(|c| &c.program)
    }
}

fn plan(
    input: &TensorInfo,
    rois: &TensorInfo,
    output: &TensorInfo,
    params: &RoiAlignParams,
) -> Result<Plan, ConfigureError> {
    let kind = require_kind("input", input)?;
    require_supported("input", kind, &SUPPORTED_KINDS)?;
    require_same_kind("rois", kind, require_kind("rois", rois)?)?;

    if !(params.spatial_scale.is_finite() && params.spatial_scale > 0.0) {
        return Err(ConfigureError::InvalidParameter(format!(
            "spatial_scale must be positive and finite; got {}",
            params.spatial_scale
        )));
    }
    if params.pooled_width == 0 || params.pooled_height == 0 {
        return Err(ConfigureError::InvalidParameter(format!(
            "pooled size must be non-zero; got {}x{}",
            params.pooled_width, params.pooled_height
        )));
    }
    if input.num_dimensions() > 3 {
        return Err(ConfigureError::ShapeMismatch(format!(
            "input {} must be a single feature map",
            input.shape()
        )));
    }
    if rois.dimension(0) != ROI_VALUES || rois.num_dimensions() > 2 {
        return Err(ConfigureError::ShapeMismatch(format!(
            "rois {} must have shape ({}, N)",
            rois.shape(),
            ROI_VALUES
        )));
    }

    let num_rois = rois.dimension(1);
    let expected_shape = TensorShape::new(&[
        params.pooled_width,
        params.pooled_height,
        input.dimension(2),
        num_rois,
    ]);
    let mut output = output.clone();
    output.auto_init_if_empty(expected_shape.clone(), kind);
    require_same_kind("output", kind, require_kind("output", &output)?)?;
    if output.shape() != &expected_shape {
        return Err(ConfigureError::ShapeMismatch(format!(
            "output shape {} should be {}",
            output.shape(),
            expected_shape
        )));
    }

    let mut options = BuildOptions::new();
    options
        .add_flag(match kind {
            DataKind::Float16 => "DATA_TYPE_FP16",
            _ => "DATA_TYPE_FP32",
        })
        .add_define("SPATIAL_SCALE", float_to_string(params.spatial_scale))
        .add_define("POOLED_H", params.pooled_height)
        .add_define("POOLED_W", params.pooled_width)
        .add_define("SAMPLING_RATIO", params.sampling_ratio)
        .add_define("IN_HEIGHT", input.dimension(1))
        .add_define("IN_WIDTH", input.dimension(0))
        .add_define("LOCAL_SIZE_X", 1)
        .add_define("LOCAL_SIZE_Y", 1)
        .add_define("LOCAL_SIZE_Z", 1);

    let step = elements_per_iteration(kind);
    let mut window = Window::build(output.shape(), &[step])?;
    let mut input_access = AccessWindowStatic::new(
        input,
        0,
        0,
        to_extent("input", input.dimension(0))?,
        to_extent("input", input.dimension(1))?,
    );
    let mut rois_access = AccessWindowStatic::new(
        rois,
        0,
        0,
        ROI_VALUES as i32,
        to_extent("rois", num_rois)?,
    );
    let full_output = ValidRegion::full(output.shape());
    let mut output_access = AccessWindowHorizontal::new(&mut output, 0, step.get(), params.border);
    update_window_and_padding(
        &mut window,
        &mut [&mut input_access, &mut output_access, &mut rois_access],
    )?;
    output_access.set_valid_region(&window, &full_output);

    require_addressable("input", input)?;
    require_addressable("rois", rois)?;
    require_addressable("output", &output)?;

    let input_window = Window::build(input.shape(), &[])?;
    check_lockstep(
        &window,
        SliceRank::Three,
        &operand_slicings(&input_window, &window),
    )?;

    Ok(Plan {
        output,
        window,
        input_window,
        options,
    })
}

fn to_extent(operand: &str, v: u32) -> Result<i32, ConfigureError> {
    i32::try_from(v)
        .map_err(|_| ConfigureError::ShapeMismatch(format!("{operand} extent {v} is too large")))
}

/// How each operand is sliced while `window` is dispatched: whole planes of
/// the launch's channels, the output block, and the launch's region row.
fn operand_slicings(input_window: &Window, window: &Window) -> [OperandSlicing; 3] {
    let input = input_window.with_outer_dims_of(window, CHANNEL_DIM);

    let mut rois = Window::new();
    rois.set(0, Dimension::new(0, ROI_VALUES as i32, nz!(5u32)));
    rois.set(1, *window.dim(ROI_DIM));

    [
        OperandSlicing::new("input", input, SliceRank::Three),
        OperandSlicing::new("output", *window, SliceRank::Three),
        OperandSlicing::new("rois", rois, SliceRank::One),
    ]
}

impl<B: Backend> Default for RoiAlignKernel<'_, B> {
    fn default() -> Self {
        RoiAlignKernel::new()
    }
}

impl<'a, B: Backend> Kernel<B> for RoiAlignKernel<'a, B> {
    fn name(&self) -> &'static str {
        PROGRAM
    }

    fn window(&self) -> Option<&Window> {
        self.configured.as_ref().map(|c| &c.window)
    }

    fn run(&self, window: &Window, backend: &B) -> Result<(), RunError> {
        let c = self.configured.as_ref().ok_or(RunError::Unconfigured)?;
        validate_subwindow(&c.window, window)?;

        let [input, output, rois] = operand_slicings(&c.input_window, window);
        let operands = [
            SlicedOperand::new(c.input, input),
            SlicedOperand::new(c.output, output),
            SlicedOperand::new(c.rois, rois),
        ];
        let submitted = dispatch_slices(
            backend,
            &*c.program,
            window,
            SliceRank::Three,
            &operands,
            &[],
        )?;
        debug!("Ran {} over {} in {} launches", PROGRAM, window, submitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_window::AccessError;
    use crate::backend::recording::{BufferId, RecordingBackend};
    use crate::backend::{DispatchExtent, KernelArg};
    use crate::shape;
    use proptest::prelude::*;

    fn tensor(backend: &RecordingBackend, shape: TensorShape, kind: DataKind) -> Tensor<BufferId> {
        Tensor::new(TensorInfo::new(shape, kind), backend.allocate_buffer())
    }

    fn empty(backend: &RecordingBackend) -> Tensor<BufferId> {
        Tensor::new(TensorInfo::empty(), backend.allocate_buffer())
    }

    #[test]
    fn test_output_is_initialized_per_region() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![40, 30, 8], DataKind::Float32);
        let rois = tensor(&backend, shape![5, 6], DataKind::Float32);
        let mut output = empty(&backend);
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(
                &backend,
                &cache,
                &input,
                &rois,
                &mut output,
                &RoiAlignParams::new(0.0625, 7, 5),
            )
            .unwrap();
        let window = *kernel.window().unwrap();
        assert_eq!(window.to_string(), "[0:7:1, 0:5:1, 0:8:1, 0:6:1]");
        drop(kernel);
        assert_eq!(output.info().shape(), &shape![7, 5, 8, 6]);
        assert!(output.info().padding().is_zero());
    }

    #[test]
    fn test_build_options_bake_in_parameters() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![40, 30, 8], DataKind::Float16);
        let rois = tensor(&backend, shape![5, 2], DataKind::Float16);
        let mut output = empty(&backend);
        let mut params = RoiAlignParams::new(0.25, 7, 7);
        params.sampling_ratio = 2;
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(&backend, &cache, &input, &rois, &mut output, &params)
            .unwrap();
        let options = &kernel.program().unwrap().options;
        assert_eq!(
            options.to_string(),
            "-DDATA_TYPE_FP16 -DIN_HEIGHT=30 -DIN_WIDTH=40 -DLOCAL_SIZE_X=1 -DLOCAL_SIZE_Y=1 \
             -DLOCAL_SIZE_Z=1 -DPOOLED_H=7 -DPOOLED_W=7 -DSAMPLING_RATIO=2 -DSPATIAL_SCALE=0.25"
        );
    }

    #[test]
    fn test_half_precision_pads_output_rows() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![16, 16, 4], DataKind::Float16);
        let rois = tensor(&backend, shape![5, 3], DataKind::Float16);
        let mut output = empty(&backend);
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(
                &backend,
                &cache,
                &input,
                &rois,
                &mut output,
                &RoiAlignParams::new(1.0, 7, 7),
            )
            .unwrap();
        assert_eq!(kernel.window().unwrap().x().end(), 8);
        drop(kernel);
        assert_eq!(output.info().padding().right, 1);
        let vr = output.info().valid_region();
        assert_eq!((vr.start(0), vr.end(0)), (0, 7));
    }

    #[test]
    fn test_half_precision_clip_drops_partial_step() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![16, 16, 4], DataKind::Float16);
        let rois = tensor(&backend, shape![5, 3], DataKind::Float16);
        let mut output = empty(&backend);
        let mut params = RoiAlignParams::new(1.0, 7, 7);
        params.border = BorderPolicy::Clip;
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(&backend, &cache, &input, &rois, &mut output, &params)
            .unwrap();
        assert_eq!(kernel.window().unwrap().x().end(), 4);
        drop(kernel);
        assert!(output.info().padding().is_zero());
        let vr = output.info().valid_region();
        assert_eq!((vr.start(0), vr.end(0)), (0, 4));
    }

    #[test]
    fn test_run_walks_regions_in_lockstep() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![10, 10, 3], DataKind::Float32);
        let rois = tensor(&backend, shape![5, 4], DataKind::Float32);
        let mut output = empty(&backend);
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(
                &backend,
                &cache,
                &input,
                &rois,
                &mut output,
                &RoiAlignParams::new(0.5, 2, 2),
            )
            .unwrap();
        kernel.run_full(&backend).unwrap();

        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 4);
        let roi_stride = rois.info().stride(1);
        let out_stride = output.info().stride(3);
        for (n, d) in dispatches.iter().enumerate() {
            assert_eq!(d.extent, DispatchExtent { x: 2, y: 2, z: 3 });
            assert_eq!(d.args.len(), 8 + 8 + 4);
            assert_eq!(d.args[0], KernelArg::Buffer(*input.buffer()));
            assert_eq!(d.args[7], KernelArg::Uint(0));
            assert_eq!(d.args[8], KernelArg::Buffer(*output.buffer()));
            let n = n as u64;
            assert_eq!(d.args[15], KernelArg::Uint(u32::try_from(n * out_stride).unwrap()));
            assert_eq!(d.args[16], KernelArg::Buffer(*rois.buffer()));
            assert_eq!(d.args[19], KernelArg::Uint(u32::try_from(n * roi_stride).unwrap()));
        }
    }

    #[test]
    fn test_channel_subwindow_offsets_input_and_output_alike() {
        let backend = RecordingBackend::new();
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![10, 10, 3], DataKind::Float32);
        let rois = tensor(&backend, shape![5, 2], DataKind::Float32);
        let mut output = empty(&backend);
        let mut kernel = RoiAlignKernel::new();
        kernel
            .configure(
                &backend,
                &cache,
                &input,
                &rois,
                &mut output,
                &RoiAlignParams::new(1.0, 2, 2),
            )
            .unwrap();
        let mut window = *kernel.window().unwrap();
        window.set(2, Dimension::new(1, 3, nz!(1u32)));
        kernel.run(&window, &backend).unwrap();

        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 2);
        let in_plane = input.info().stride(2);
        let out_plane = output.info().stride(2);
        let out_roi = output.info().stride(3);
        for (n, d) in dispatches.iter().enumerate() {
            assert_eq!(d.extent, DispatchExtent { x: 2, y: 2, z: 2 });
            assert_eq!(d.args[7], KernelArg::Uint(u32::try_from(in_plane).unwrap()));
            let out_offset = out_plane + n as u64 * out_roi;
            assert_eq!(d.args[15], KernelArg::Uint(u32::try_from(out_offset).unwrap()));
        }
    }

    #[test]
    fn test_batched_input_is_rejected() {
        let input = TensorInfo::new(shape![10, 10, 3, 2], DataKind::Float32);
        let rois = TensorInfo::new(shape![5, 4], DataKind::Float32);
        assert!(matches!(
            RoiAlignKernel::<RecordingBackend>::validate(
                &input,
                &rois,
                &TensorInfo::empty(),
                &RoiAlignParams::new(1.0, 2, 2)
            ),
            Err(ConfigureError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_malformed_rois_are_rejected() {
        let input = TensorInfo::new(shape![10, 10, 3], DataKind::Float32);
        let rois = TensorInfo::new(shape![4, 4], DataKind::Float32);
        assert!(matches!(
            RoiAlignKernel::<RecordingBackend>::validate(
                &input,
                &rois,
                &TensorInfo::empty(),
                &RoiAlignParams::new(1.0, 2, 2)
            ),
            Err(ConfigureError::ShapeMismatch(_))
        ));
        let f16_rois = TensorInfo::new(shape![5, 4], DataKind::Float16);
        assert!(matches!(
            RoiAlignKernel::<RecordingBackend>::validate(
                &input,
                &f16_rois,
                &TensorInfo::empty(),
                &RoiAlignParams::new(1.0, 2, 2)
            ),
            Err(ConfigureError::DataKindMismatch { operand: "rois", .. })
        ));
    }

    #[test]
    fn test_bad_parameters_are_rejected() {
        let input = TensorInfo::new(shape![10, 10, 3], DataKind::Float32);
        let rois = TensorInfo::new(shape![5, 4], DataKind::Float32);
        for params in [
            RoiAlignParams::new(0.0, 2, 2),
            RoiAlignParams::new(f32::NAN, 2, 2),
            RoiAlignParams::new(1.0, 0, 2),
        ] {
            assert!(matches!(
                RoiAlignKernel::<RecordingBackend>::validate(
                    &input,
                    &rois,
                    &TensorInfo::empty(),
                    &params
                ),
                Err(ConfigureError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_integer_input_is_unsupported() {
        let input = TensorInfo::new(shape![10, 10, 3], DataKind::Sint16);
        let rois = TensorInfo::new(shape![5, 4], DataKind::Sint16);
        assert!(matches!(
            RoiAlignKernel::<RecordingBackend>::validate(
                &input,
                &rois,
                &TensorInfo::empty(),
                &RoiAlignParams::new(1.0, 2, 2)
            ),
            Err(ConfigureError::UnsupportedDataKind { .. })
        ));
    }

    #[test]
    fn test_preinitialized_output_with_wrong_shape_is_rejected() {
        let input = TensorInfo::new(shape![10, 10, 3], DataKind::Float32);
        let rois = TensorInfo::new(shape![5, 4], DataKind::Float32);
        let output = TensorInfo::new(shape![10, 10, 3], DataKind::Float32);
        assert!(matches!(
            RoiAlignKernel::<RecordingBackend>::validate(
                &input,
                &rois,
                &output,
                &RoiAlignParams::new(1.0, 2, 2)
            ),
            Err(ConfigureError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_rois_read_past_their_extent_is_invalid_region() {
        let rois = TensorInfo::new(shape![5, 2], DataKind::Float32);
        let mut access = AccessWindowStatic::new(&rois, 0, 0, 5, 3);
        let mut window = Window::new();
        assert!(matches!(
            update_window_and_padding(&mut window, &mut [&mut access]),
            Err(AccessError::InvalidRegion { max_y: 3, extent_y: 2, .. })
        ));
    }

    #[test]
    fn test_compile_failure_leaves_output_untouched() {
        let backend = RecordingBackend::new();
        backend.fail_compiles_of(PROGRAM);
        let cache = ProgramCache::new();
        let input = tensor(&backend, shape![16, 16, 4], DataKind::Float16);
        let rois = tensor(&backend, shape![5, 3], DataKind::Float16);
        let mut output = empty(&backend);
        let before = output.clone();
        let mut kernel = RoiAlignKernel::new();
        let result = kernel.configure(
            &backend,
            &cache,
            &input,
            &rois,
            &mut output,
            &RoiAlignParams::new(1.0, 7, 7),
        );
        assert!(matches!(result, Err(ConfigureError::Compile { .. })));
        assert!(kernel.window().is_none());
        drop(kernel);
        assert_eq!(output, before);
    }

    proptest! {
        #[test]
        fn test_launches_cover_output(
            pooled in 1u32..9,
            channels in 1u32..4,
            num_rois in 1u32..5,
            half in any::<bool>(),
            border in any::<BorderPolicy>(),
        ) {
            let kind = if half { DataKind::Float16 } else { DataKind::Float32 };
            let backend = RecordingBackend::new();
            let cache = ProgramCache::new();
            let input = tensor(&backend, shape![12, 12, channels], kind);
            let rois = tensor(&backend, shape![5, num_rois], kind);
            let mut output = empty(&backend);
            let mut params = RoiAlignParams::new(0.5, pooled, pooled);
            params.border = border;
            let mut kernel = RoiAlignKernel::new();
            kernel
                .configure(&backend, &cache, &input, &rois, &mut output, &params)
                .unwrap();
            kernel.run_full(&backend).unwrap();
            let window = *kernel.window().unwrap();
            let step = i32::try_from(elements_per_iteration(kind).get()).unwrap();
            prop_assert_eq!(window.x().end() % step, 0);
            let launched: u64 = backend.dispatches().iter().map(|d| d.extent.volume()).sum();
            prop_assert_eq!(launched, window.total_iterations());
        }
    }
}
