//! Audio pipeline: format model, buffer contract, decode source and device output

pub mod backend;
pub mod buffer;
pub mod format;
pub mod frame_source;
mod gate;
pub mod library;
pub mod output;

pub use backend::{AudioBackend, CallbackCounter, CaptureHandle, CpalBackend, NullBackend};
pub use buffer::{AudioBufferList, BufferRequest, DataSource, FillResult, PcmSample};
pub use format::{AudioFormatDescriptor, FormatHint, Layout, SampleType};
pub use frame_source::{FrameSource, PositionProbe, TrackHandle};
pub use library::{FolderLibrary, MediaLibrary, TrackId};
pub use output::{Output, OutputStats};
