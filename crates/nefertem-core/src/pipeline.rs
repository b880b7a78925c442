use std::path::Path;

use rayon::prelude::*;

use crate::analyzer::{run_analyzer, Analyzer, Coala, Pydocstyle, Pylint, Pytest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use crate::types::{AnalyzerReport, RunReport};

/// Runs a set of analyzers against one project.
pub struct AnalysisPipeline {
    analyzers: Vec<Box<dyn Analyzer>>,
    config: Config,
    runner: CommandRunner,
}

impl AnalysisPipeline {
    pub fn new(analyzers: Vec<Box<dyn Analyzer>>, config: Config) -> Self {
        let runner = CommandRunner::new(config.runner.timeout());
        Self {
            analyzers,
            config,
            runner,
        }
    }

    /// All four analyzers with default options, in `run-all` order.
    pub fn with_default_analyzers(config: Config) -> Self {
        Self::new(
            vec![
                Box::new(Pydocstyle::default()),
                Box::new(Pytest::default()),
                Box::new(Pylint),
                Box::new(Coala::default()),
            ],
            config,
        )
    }

    pub fn analyzer_names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// Run a single analyzer. Failed preconditions and runner faults are errors.
    pub fn run_one(&self, analyzer: &dyn Analyzer, project: &Path) -> Result<AnalyzerReport> {
        run_analyzer(analyzer, project, &self.config, &self.runner)
    }

    /// Run every analyzer in the pipeline and aggregate the results.
    ///
    /// One analyzer failing never prevents the others from running: a missing
    /// tests directory becomes a `skipped` entry and a runner fault an `error`
    /// entry. The returned report has exactly one key per analyzer.
    pub fn run_all(&self, project: &Path, parallel: bool) -> RunReport {
        let run = |analyzer: &Box<dyn Analyzer>| {
            let report = self.tolerant_run(analyzer.as_ref(), project);
            log::info!("{}: {}", analyzer.name(), report.status());
            (analyzer.name().to_string(), report)
        };

        if parallel {
            self.analyzers.par_iter().map(run).collect()
        } else {
            self.analyzers.iter().map(run).collect()
        }
    }

    fn tolerant_run(&self, analyzer: &dyn Analyzer, project: &Path) -> AnalyzerReport {
        match self.run_one(analyzer, project) {
            Ok(report) => report,
            Err(e @ Error::MissingTests { .. }) => {
                log::warn!("{}: {e}", analyzer.name());
                AnalyzerReport::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                log::error!("{}: {e}", analyzer.name());
                AnalyzerReport::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}
