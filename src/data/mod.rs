//! Frame types, TWV container storage and still-image export.
pub mod frame;
pub mod tiff_writer;
pub mod twv;
pub mod twv_reader;
pub mod twv_writer;

pub use frame::{DecodedFrame, FrameMetadata, PixelFormat, RawFrame};
pub use tiff_writer::TiffWriter;
pub use twv_reader::{ContainerCheck, TwvReader};
pub use twv_writer::TwvWriter;
