pub mod container;
pub mod codec;
pub mod encoding;
pub mod markup;
pub mod job;
pub mod convert;
pub mod writer;

pub use container::{Container, ContainerError};
pub use codec::{CompressionKind, DecodeReport, get_codec};
pub use encoding::{resolve, ResolvedText};
pub use markup::{strip, MarkupBackend};
pub use job::{JobHandle, JobState};
pub use convert::{Capabilities, ConversionOutcome, ConversionSummary, ConvertError, ConvertOptions, Converter};
pub use writer::ContainerBuilder;
