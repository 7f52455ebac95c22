pub mod access_window;
pub mod backend;
pub mod common;
pub mod dispatch;
pub mod kernel;
pub mod kernels;
pub mod pprint;
pub mod shape;
pub mod slice;
pub mod specialization;
pub mod tensor;
pub mod tensorinfo;
pub mod utils;
pub mod window;

// Re-exported for the `steps!` macro.
pub use smallvec;
