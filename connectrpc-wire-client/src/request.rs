//! Request-side encoding.

mod encoder;

pub use encoder::FrameEncoder;
