pub mod capturer;
pub mod decoder;
pub mod entropy;
mod errors;

pub use capturer::{list_interfaces, CaptureSettings, CaptureStats, Capturer, FrameSource, PcapSource, RawFrame};
pub use decoder::{decode, LinkLayer};
pub use entropy::entropy;
pub use errors::CaptureError;
