pub mod channel_shuffle;
pub mod roi_align;

pub use channel_shuffle::{ChannelShuffleKernel, ChannelShuffleParams};
pub use roi_align::{RoiAlignKernel, RoiAlignParams};
