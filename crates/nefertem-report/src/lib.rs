pub mod json;

pub use json::{present, Metadata, OutputMode};
