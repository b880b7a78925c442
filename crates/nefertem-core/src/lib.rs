pub mod analyzer;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod types;

pub use analyzer::{
    Analyzer, Coala, CoalaOptions, Pydocstyle, PydocstyleOptions, Pylint, Pytest, PytestOptions,
};
pub use config::Config;
pub use error::Error;
pub use pipeline::AnalysisPipeline;
pub use resolver::{RepositoryResolver, ResolvedProject};
pub use runner::CommandRunner;
pub use types::*;
