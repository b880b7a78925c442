use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;

use nefertem_core::analyzer::{
    run_analyzer, Analyzer, Coala, CoalaOptions, Pydocstyle, PydocstyleOptions, Pylint, Pytest,
    PytestOptions,
};
use nefertem_core::config::{Config, CONFIG_FILE_NAME};
use nefertem_core::resolver::{RepositoryResolver, DEFAULT_BRANCH};
use nefertem_core::{AnalysisPipeline, CommandRunner};
use nefertem_report::{present, Metadata, OutputMode};

const ANALYZER_NAME: &str = "nefertem";
const ANALYZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "nefertem")]
#[command(about = "Analyze Python source code with pylint, coala, pytest and pydocstyle")]
#[command(version)]
struct Cli {
    /// Be verbose about what's going on
    #[arg(
        short,
        long,
        global = true,
        env = "NEFERTEM_VERBOSE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    verbose: bool,
    /// Wrap results in a metadata envelope and pretty-print them
    #[arg(
        long,
        global = true,
        env = "NEFERTEM_JSON_OUTPUT",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    annotated: bool,
    /// Timeout for each external command, in seconds
    #[arg(long, global = true, env = "NEFERTEM_COMMAND_TIMEOUT", value_name = "SECS")]
    timeout: Option<u64>,
    /// Config file path (defaults to .nefertem.toml in the working directory or above)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Branch to check out when the project is a remote repository
    #[arg(long, global = true, default_value = DEFAULT_BRANCH)]
    branch: String,
    /// Directory to clone remote repositories into (defaults to the working directory)
    #[arg(long, global = true, value_name = "DIR")]
    clone_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProjectArg {
    /// Local path or remote repository URL of the project
    #[arg(value_name = "PROJECT", env = "NEFERTEM_PROJECT")]
    project: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all static analyzers and execute the test-suite on the given codebase
    RunAll {
        #[command(flatten)]
        project: ProjectArg,
        /// Run the analyzers concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Run PyLint on the given codebase
    Pylint {
        #[command(flatten)]
        project: ProjectArg,
    },
    /// Run Coala bears on the given codebase
    Coala {
        #[command(flatten)]
        project: ProjectArg,
        /// Do not use colorized output
        #[arg(long)]
        no_color: bool,
        /// Apply fixes where possible
        #[arg(long)]
        apply_patches: bool,
        /// Print output as a JSON
        #[arg(long)]
        json: bool,
    },
    /// Execute the test-suite for the given codebase
    Pytest {
        #[command(flatten)]
        project: ProjectArg,
        /// Per-test timeout in seconds
        #[arg(long, value_name = "SECS")]
        test_timeout: Option<u64>,
    },
    /// Check formatting of Python's docstrings
    Pydocstyle {
        #[command(flatten)]
        project: ProjectArg,
        /// Skip test_*.py files (default)
        #[arg(long, overrides_with = "include_tests")]
        exclude_tests: bool,
        /// Check test_*.py files too
        #[arg(long, overrides_with = "exclude_tests")]
        include_tests: bool,
    },
    /// Create a default .nefertem.toml configuration file
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

/// Settings shared by every analyzer subcommand.
struct Invocation {
    config: Config,
    mode: OutputMode,
    branch: String,
    clone_dir: Option<PathBuf>,
}

impl Invocation {
    /// Load the configuration and apply the global CLI overrides on top of it.
    fn new(
        config_path: Option<&Path>,
        timeout: Option<u64>,
        annotated: bool,
        branch: &str,
        clone_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut config = load_config(config_path)?;
        if let Some(timeout) = timeout {
            config.runner.timeout_secs = timeout;
        }
        let mode = if annotated || config.output.annotated {
            OutputMode::Annotated
        } else {
            OutputMode::Plain
        };
        Ok(Self {
            config,
            mode,
            branch: branch.to_string(),
            clone_dir: clone_dir.map(Path::to_path_buf),
        })
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", "error:".red().bold());
        process::exit(2);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "info,nefertem=debug,nefertem_core=debug,nefertem_report=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    if verbose {
        log::debug!("Debug mode turned on");
        log::debug!("Nefertem version: {ANALYZER_VERSION}");
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        annotated,
        timeout,
        config,
        branch,
        clone_dir,
        command,
        ..
    } = cli;
    // Only analyzer subcommands need a valid configuration
    let invocation = || {
        Invocation::new(
            config.as_deref(),
            timeout,
            annotated,
            &branch,
            clone_dir.as_deref(),
        )
    };

    match command {
        Commands::RunAll { project, parallel } => {
            cmd_run_all(&invocation()?, &project.project, parallel)
        }
        Commands::Pylint { project } => {
            cmd_single(&invocation()?, "pylint", &project.project, &Pylint, json!({}))
        }
        Commands::Coala {
            project,
            no_color,
            apply_patches,
            json,
        } => {
            let options = CoalaOptions {
                no_color,
                apply_patches,
                json,
            };
            cmd_single(
                &invocation()?,
                "coala",
                &project.project,
                &Coala { options },
                serde_json::to_value(options)?,
            )
        }
        Commands::Pytest {
            project,
            test_timeout,
        } => {
            let options = PytestOptions { test_timeout };
            cmd_single(
                &invocation()?,
                "pytest",
                &project.project,
                &Pytest { options },
                serde_json::to_value(options)?,
            )
        }
        Commands::Pydocstyle {
            project,
            exclude_tests: _,
            include_tests,
        } => {
            let options = PydocstyleOptions {
                exclude_tests: !include_tests,
            };
            cmd_single(
                &invocation()?,
                "pydocstyle",
                &project.project,
                &Pydocstyle { options },
                serde_json::to_value(options)?,
            )
        }
        Commands::Init { force } => cmd_init(force),
    }
}

fn cmd_run_all(invocation: &Invocation, project: &str, parallel: bool) -> Result<()> {
    let project_path = resolve_project(invocation, project)?;
    let pipeline = AnalysisPipeline::with_default_analyzers(invocation.config.clone());
    let report = pipeline.run_all(&project_path, parallel);

    let metadata = metadata(invocation, "run-all", project, json!({ "parallel": parallel }));
    present(&report, invocation.mode, &metadata)
}

fn cmd_single(
    invocation: &Invocation,
    command: &str,
    project: &str,
    analyzer: &dyn Analyzer,
    options: serde_json::Value,
) -> Result<()> {
    let project_path = resolve_project(invocation, project)?;
    let runner = CommandRunner::new(invocation.config.runner.timeout());
    let report = run_analyzer(analyzer, &project_path, &invocation.config, &runner)?;
    log::info!("{}: {}", analyzer.name(), report.status());

    let metadata = metadata(invocation, command, project, options);
    present(&report, invocation.mode, &metadata)
}

fn cmd_init(force: bool) -> Result<()> {
    let target = PathBuf::from(CONFIG_FILE_NAME);
    if target.exists() && !force {
        anyhow::bail!("{CONFIG_FILE_NAME} already exists. Use --force to overwrite.");
    }
    std::fs::write(&target, Config::default_toml())
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("Created {CONFIG_FILE_NAME} with default configuration.");
    Ok(())
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(p) => Config::load(p),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            Config::load_or_default(&cwd)
        }
    }
}

fn resolve_project(invocation: &Invocation, project: &str) -> Result<PathBuf> {
    let resolver = RepositoryResolver::new(
        invocation.config.tools.executables.git.clone(),
        CommandRunner::new(invocation.config.runner.timeout()),
    );
    let resolved = resolver.resolve(
        project,
        invocation.clone_dir.as_deref(),
        Some(&invocation.branch),
    )?;
    if resolved.cloned {
        log::info!("cloned {project} into {}", resolved.path.display());
    }
    Ok(resolved.path)
}

fn metadata(
    invocation: &Invocation,
    command: &str,
    project: &str,
    options: serde_json::Value,
) -> Metadata {
    Metadata::new(
        ANALYZER_NAME,
        ANALYZER_VERSION,
        command,
        json!({
            "project": project,
            "branch": invocation.branch,
            "options": options,
        }),
    )
}
