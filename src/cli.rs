use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level argument parser. A `clap`-derived enum of
/// subcommands, each carrying its own flags plus the shared credentials.
#[derive(Debug, Parser)]
#[command(name = "fleet-orchestrator", about = "Declarative deployment orchestrator for a container-scheduling cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile desired state against the live cluster (the default mode).
    Service(ServiceArgs),
    /// Render every environment in a directory against the shared services YAML; issue no cloud calls.
    TestTemplates(TestTemplatesArgs),
    /// List every service/rule this tool manages and delete them after interactive confirmation.
    Delete(DeleteArgs),
}

/// `--key` / `--secret` / `--region` / `--threads-count`, shared across subcommands.
#[derive(Debug, Args, Clone)]
pub struct Credentials {
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub secret: String,
    #[arg(long, default_value = "us-east-1")]
    pub region: String,
    #[arg(long, default_value_t = 5)]
    pub threads_count: usize,
}

#[derive(Debug, Args)]
pub struct ServiceArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    /// Modern mode: services.yaml.
    #[arg(long)]
    pub services_yaml: Option<PathBuf>,
    /// Modern mode: environment.yaml.
    #[arg(long)]
    pub environment_yaml: Option<PathBuf>,

    /// Legacy mode: directory of JSON task-definition templates.
    #[arg(long)]
    pub task_definition_template_dir: Option<PathBuf>,
    /// Legacy mode: single config JSON rendered against every template.
    #[arg(long)]
    pub task_definition_config_json: Option<PathBuf>,

    #[arg(long = "task-definition-config-env", action = clap::ArgAction::SetTrue)]
    task_definition_config_env: bool,
    #[arg(long = "no-task-definition-config-env", action = clap::ArgAction::SetTrue)]
    no_task_definition_config_env: bool,

    #[arg(long)]
    pub template_group: Option<String>,
    #[arg(long)]
    pub deploy_service_group: Option<String>,

    #[arg(long = "service-zero-keep", action = clap::ArgAction::SetTrue)]
    service_zero_keep: bool,
    #[arg(long = "no-service-zero-keep", action = clap::ArgAction::SetTrue)]
    no_service_zero_keep: bool,

    #[arg(long = "stop-before-deploy", action = clap::ArgAction::SetTrue, default_value_t = true)]
    stop_before_deploy: bool,
    #[arg(long = "no-stop-before-deploy", action = clap::ArgAction::SetTrue)]
    no_stop_before_deploy: bool,

    #[arg(long = "delete-unused-service", action = clap::ArgAction::SetTrue, default_value_t = true)]
    delete_unused_service: bool,
    #[arg(long = "no-delete-unused-service", action = clap::ArgAction::SetTrue)]
    no_delete_unused_service: bool,

    #[arg(long, default_value_t = 30)]
    pub service_wait_max_attempts: u32,
    #[arg(long, default_value_t = 10)]
    pub service_wait_delay: u64,

    #[arg(long = "placement-strategy-binpack-first", action = clap::ArgAction::SetTrue)]
    placement_strategy_binpack_first: bool,
    #[arg(long = "no-placement-strategy-binpack-first", action = clap::ArgAction::SetTrue)]
    no_placement_strategy_binpack_first: bool,

    /// Load and render only; issue no cloud calls and log the resulting counts.
    #[arg(long)]
    pub test: bool,
    /// Fetch, classify, and log what would change without mutating anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl ServiceArgs {
    /// Resolves the `--[no-]task-definition-config-env` pair: the `--no-` form always wins.
    pub fn task_definition_config_env(&self) -> bool {
        self.task_definition_config_env && !self.no_task_definition_config_env
    }
    pub fn service_zero_keep(&self) -> bool {
        self.service_zero_keep && !self.no_service_zero_keep
    }
    pub fn stop_before_deploy(&self) -> bool {
        self.stop_before_deploy && !self.no_stop_before_deploy
    }
    pub fn delete_unused_service(&self) -> bool {
        self.delete_unused_service && !self.no_delete_unused_service
    }
    pub fn placement_strategy_binpack_first(&self) -> bool {
        self.placement_strategy_binpack_first && !self.no_placement_strategy_binpack_first
    }
}

#[derive(Debug, Args)]
pub struct TestTemplatesArgs {
    #[arg(long)]
    pub services_yaml: Option<PathBuf>,
    #[arg(long)]
    pub environment_yaml_dir: Option<PathBuf>,

    #[arg(long)]
    pub task_definition_template_dir: Option<PathBuf>,
    #[arg(long)]
    pub task_definition_config_json: Option<PathBuf>,

    #[arg(long = "task-definition-config-env", action = clap::ArgAction::SetTrue)]
    task_definition_config_env: bool,
    #[arg(long = "no-task-definition-config-env", action = clap::ArgAction::SetTrue)]
    no_task_definition_config_env: bool,
}

impl TestTemplatesArgs {
    pub fn task_definition_config_env(&self) -> bool {
        self.task_definition_config_env && !self.no_task_definition_config_env
    }
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    #[arg(long)]
    pub environment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["fleet-orchestrator", "service", "--key", "k", "--secret", "s"]
    }

    #[test]
    fn defaults_keep_stop_before_deploy_and_delete_unused_service_on() {
        let cli = Cli::parse_from(base_args());
        let Command::Service(args) = cli.command else { panic!("expected service subcommand") };
        assert!(args.stop_before_deploy());
        assert!(args.delete_unused_service());
    }

    #[test]
    fn no_stop_before_deploy_turns_the_default_off() {
        let mut argv = base_args();
        argv.push("--no-stop-before-deploy");
        let cli = Cli::parse_from(argv);
        let Command::Service(args) = cli.command else { panic!("expected service subcommand") };
        assert!(!args.stop_before_deploy());
        assert!(args.delete_unused_service());
    }

    #[test]
    fn no_delete_unused_service_turns_the_default_off() {
        let mut argv = base_args();
        argv.push("--no-delete-unused-service");
        let cli = Cli::parse_from(argv);
        let Command::Service(args) = cli.command else { panic!("expected service subcommand") };
        assert!(args.stop_before_deploy());
        assert!(!args.delete_unused_service());
    }

    #[test]
    fn opt_in_flags_stay_off_unless_passed() {
        let cli = Cli::parse_from(base_args());
        let Command::Service(args) = cli.command else { panic!("expected service subcommand") };
        assert!(!args.service_zero_keep());
        assert!(!args.placement_strategy_binpack_first());
        assert!(!args.task_definition_config_env());
    }

    #[test]
    fn opt_in_flags_turn_on_when_passed() {
        let mut argv = base_args();
        argv.extend(["--service-zero-keep", "--placement-strategy-binpack-first", "--task-definition-config-env"]);
        let cli = Cli::parse_from(argv);
        let Command::Service(args) = cli.command else { panic!("expected service subcommand") };
        assert!(args.service_zero_keep());
        assert!(args.placement_strategy_binpack_first());
        assert!(args.task_definition_config_env());
    }
}
