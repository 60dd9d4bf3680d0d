//! Data module - Table loading and processing

mod loader;
mod processor;

pub use loader::{DataLoader, LoadError, SourceDescriptor, SourceFormat, TextEncoding};
pub use processor::{is_numeric_dtype, Condition, DataProcessor, Literal, ProcessorError};
