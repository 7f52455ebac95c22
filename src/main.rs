use anyhow::Result;
use clap::Parser;
use log::info;

use windispatch::access_window::BorderPolicy;
use windispatch::backend::recording::RecordingBackend;
use windispatch::common::DataKind;
use windispatch::kernel::Kernel;
use windispatch::kernels::{
    ChannelShuffleKernel, ChannelShuffleParams, RoiAlignKernel, RoiAlignParams,
};
use windispatch::pprint::{pprint_configuration, pprint_dispatches};
use windispatch::shape;
use windispatch::specialization::ProgramCache;
use windispatch::tensor::Tensor;
use windispatch::tensorinfo::TensorInfo;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to do when a step runs past a tensor's edge
    #[arg(long, value_enum, default_value_t = BorderPolicy::Pad)]
    border: BorderPolicy,

    /// Element kind of every operand
    #[arg(long, value_enum, default_value_t = DataKind::Float32)]
    kind: DataKind,

    #[command(subcommand)]
    operator: Operator,
}

#[derive(clap::Subcommand)]
enum Operator {
    #[command(about = "Plan a channel shuffle")]
    ChannelShuffle {
        #[arg(long, default_value = "42")]
        width: u32,
        #[arg(long, default_value = "40")]
        height: u32,
        #[arg(long, default_value = "6")]
        channels: u32,
        #[arg(long, default_value = "1")]
        batches: u32,
        #[arg(long, short, default_value = "2")]
        groups: u32,
    },
    #[command(about = "Plan a region-of-interest align")]
    RoiAlign {
        #[arg(long, default_value = "40")]
        width: u32,
        #[arg(long, default_value = "30")]
        height: u32,
        #[arg(long, default_value = "8")]
        channels: u32,
        #[arg(long, default_value = "4")]
        rois: u32,
        #[arg(long, default_value = "7")]
        pooled_width: u32,
        #[arg(long, default_value = "7")]
        pooled_height: u32,
        #[arg(long, default_value = "0.0625")]
        spatial_scale: f32,
        #[arg(long, default_value = "0")]
        sampling_ratio: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let backend = RecordingBackend::new();
    let cache = ProgramCache::new();

    match args.operator {
        Operator::ChannelShuffle {
            width,
            height,
            channels,
            batches,
            groups,
        } => {
            let mut input = Tensor::new(
                TensorInfo::new(shape![width, height, channels, batches], args.kind),
                backend.allocate_buffer(),
            );
            let mut output = Tensor::new(TensorInfo::empty(), backend.allocate_buffer());
            let params = ChannelShuffleParams {
                groups,
                border: args.border,
            };

            let mut kernel = ChannelShuffleKernel::new();
            kernel.configure(&backend, &cache, &mut input, &mut output, &params)?;
            kernel.run_full(&backend)?;
            let window = *kernel.window().expect("configured kernel has a window");
            drop(kernel);

            pprint_configuration(&[("input", input.info()), ("output", output.info())], &window);
        }
        Operator::RoiAlign {
            width,
            height,
            channels,
            rois,
            pooled_width,
            pooled_height,
            spatial_scale,
            sampling_ratio,
        } => {
            let input = Tensor::new(
                TensorInfo::new(shape![width, height, channels], args.kind),
                backend.allocate_buffer(),
            );
            let rois = Tensor::new(
                TensorInfo::new(shape![5, rois], args.kind),
                backend.allocate_buffer(),
            );
            let mut output = Tensor::new(TensorInfo::empty(), backend.allocate_buffer());
            let params = RoiAlignParams {
                spatial_scale,
                pooled_width,
                pooled_height,
                sampling_ratio,
                border: args.border,
            };

            let mut kernel = RoiAlignKernel::new();
            kernel.configure(&backend, &cache, &input, &rois, &mut output, &params)?;
            kernel.run_full(&backend)?;
            let window = *kernel.window().expect("configured kernel has a window");
            drop(kernel);

            pprint_configuration(
                &[
                    ("input", input.info()),
                    ("rois", rois.info()),
                    ("output", output.info()),
                ],
                &window,
            );
        }
    }

    let dispatches = backend.dispatches();
    info!(
        "{} launches from {} compiled programs",
        dispatches.len(),
        backend.compile_count()
    );
    println!();
    pprint_dispatches(&dispatches);
    Ok(())
}
