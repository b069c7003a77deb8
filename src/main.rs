//! Lagoon build
use std::path::{Path, PathBuf};

use crate::build_values::{BuildContext, BuildType, EnvironmentType};
use crate::expression::TaskEnvironment;
use crate::ingress::MonitoringConfig;
use crate::lagoon_yaml::LagoonYaml;
use crate::tasks::{DryRunExecutor, Phase, ShellExecutor};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use thiserror::Error;

mod build_values;
mod config;
mod expression;
mod ingress;
mod lagoon_yaml;
mod naming;
mod route;
mod tasks;
mod template;

/// Variables from the build environment that task conditions can refer to.
const TASK_ENVIRONMENT_KEYS: [&str; 10] = [
    "LAGOON_PROJECT",
    "LAGOON_ENVIRONMENT",
    "LAGOON_ENVIRONMENT_TYPE",
    "LAGOON_BUILD_TYPE",
    "LAGOON_GIT_BRANCH",
    "LAGOON_GIT_SHA",
    "LAGOON_PR_NUMBER",
    "LAGOON_PR_HEAD_BRANCH",
    "LAGOON_PR_BASE_BRANCH",
    "LAGOON_VERSION",
];

/// Template ingress resources and run rollout tasks for a Lagoon environment.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root of the source code tree, containing `.lagoon.yml`.
    #[arg(default_value = ".")]
    source_directory: PathBuf,

    /// Path to the configuration file. Defaults to `lbd.toml` in the source directory, if present.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate an ingress for every route of the environment being built.
    Ingress {
        #[command(flatten)]
        build: BuildArgs,

        /// Write one `<ingress-name>.yaml` per route here instead of printing to standard output.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run the tasks of a rollout phase.
    Tasks {
        #[arg(value_enum)]
        phase: Phase,

        /// Extra variables for task conditions, as KEY=VALUE. Can be repeated.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// JSON object with variables for task conditions.
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Log eligible tasks instead of running them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
struct BuildArgs {
    #[arg(long, env = "LAGOON_PROJECT")]
    project: String,
    #[arg(long, env = "LAGOON_ENVIRONMENT")]
    environment: String,
    #[arg(long, env = "LAGOON_ENVIRONMENT_TYPE", value_enum)]
    environment_type: EnvironmentType,
    #[arg(long, env = "LAGOON_BUILD_TYPE", value_enum, default_value = "branch")]
    build_type: BuildType,
    #[arg(long, env = "LAGOON_GIT_BRANCH", default_value = "")]
    branch: String,
    #[arg(long, env = "LAGOON_PR_NUMBER", default_value = "")]
    pr_number: String,
    #[arg(long, env = "LAGOON_PR_HEAD_BRANCH", default_value = "")]
    pr_head_branch: String,
    #[arg(long, env = "LAGOON_PR_BASE_BRANCH", default_value = "")]
    pr_base_branch: String,
    #[arg(long, env = "LAGOON_VERSION", default_value = "")]
    lagoon_version: String,
    #[arg(long, env = "LAGOON_SHORT_AUTOGENERATED_ROUTE_DOMAIN")]
    short_autogenerated_route_domain: Option<String>,
}

impl From<BuildArgs> for BuildContext {
    fn from(args: BuildArgs) -> Self {
        Self {
            project: args.project,
            environment: args.environment,
            environment_type: args.environment_type,
            build_type: args.build_type,
            branch: args.branch,
            pr_number: args.pr_number,
            pr_head_branch: args.pr_head_branch,
            pr_base_branch: args.pr_base_branch,
            lagoon_version: args.lagoon_version,
            short_autogenerated_route_domain: args.short_autogenerated_route_domain,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),

    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("detect .lagoon.yml: {0}")]
    LagoonYaml(#[from] lagoon_yaml::Error),

    #[error("task environment: {0}")]
    TaskEnvironment(#[from] expression::EnvironmentError),

    #[error("template: {0}")]
    Template(#[from] template::Error),

    #[error(transparent)]
    Phase(#[from] tasks::PhaseError),
}

/// Load `lbd.toml`, layered over the compiled-in `default.toml`.
///
/// `--config` names the file explicitly and must exist. Without it, an
/// `lbd.toml` next to `.lagoon.yml` is picked up when present; otherwise
/// the built-in defaults apply unchanged.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "lbd.toml";

    // Typically found in project root, e.g. ./lbd.toml
    let config_path = args.source_directory.join(DEFAULT_CONFIG_FILE);

    let config_file = match &args.config {
        None => Some(config_path).filter(|path| path.is_file()),
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        info!("Using configuration file {}", config_file.display());
        config::File::default_with_user_config_file(&config_file)?
    } else {
        config::File::default()
    })
}

fn main() {
    match run() {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;

    info!("Lagoon build {}", env!("CARGO_PKG_VERSION"));

    let lagoon_yaml_path = lagoon_yaml::detect_lagoon_yaml(&args.source_directory)?;
    info!(".lagoon.yml detected at {}", lagoon_yaml_path.display());
    let lagoon_yaml = LagoonYaml::parse_file(&lagoon_yaml_path)?;

    match args.command {
        Commands::Ingress { build, output_dir } => {
            let build = BuildContext::from(build);
            let monitoring = MonitoringConfig::from(&cfg.monitoring);
            generate_ingresses(&lagoon_yaml, &build, &monitoring, output_dir.as_deref())
        }
        Commands::Tasks {
            phase,
            env,
            env_file,
            dry_run,
        } => {
            let mut environment = TaskEnvironment::from_process_env(TASK_ENVIRONMENT_KEYS);
            if let Some(env_file) = env_file {
                environment.merge(TaskEnvironment::from_json(&std::fs::read_to_string(env_file)?)?);
            }
            environment.merge(TaskEnvironment::from_pairs(&env)?);
            if environment.is_empty() {
                warn!("Task environment is empty; conditions referring to variables will fail");
            }

            let phase_tasks = lagoon_yaml.tasks(phase);
            let allow_missing_service =
                phase == Phase::PreRollout && cfg.tasks.allow_missing_service_pre_rollout;

            if dry_run {
                let runner = tasks::iterate_tasks(DryRunExecutor::default(), allow_missing_service);
                tasks::run_phase(phase, runner, phase_tasks, &environment)?;
            } else {
                let executor = ShellExecutor {
                    services: cfg.tasks.services.clone(),
                };
                let runner = tasks::iterate_tasks(executor, allow_missing_service);
                tasks::run_phase(phase, runner, phase_tasks, &environment)?;
            }
            Ok(())
        }
    }
}

fn generate_ingresses(
    lagoon_yaml: &LagoonYaml,
    build: &BuildContext,
    monitoring: &MonitoringConfig,
    output_dir: Option<&Path>,
) -> Result<(), Error> {
    let routes = lagoon_yaml.routes(&build.environment);
    info!("{} routes declared for environment {}", routes.len(), build.environment);

    let ingresses: Vec<_> = routes
        .iter()
        .map(|route| ingress::generate_ingress(route, build, monitoring))
        .collect();

    match output_dir {
        None => {
            print!("{}", template::render_all(&ingresses)?);
        }
        Some(output_dir) => {
            std::fs::create_dir_all(output_dir)?;
            for ingress in &ingresses {
                let path = output_dir.join(format!("{}.yaml", ingress.metadata.name));
                template::write_template_file(&path, &template::render(ingress)?)?;
                info!("Ingress {} written to {}", ingress.metadata.name, path.display());
            }
        }
    }
    Ok(())
}
