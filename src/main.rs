use clap::Parser;
use fleet_orchestrator::cli::{Cli, Command};
use fleet_orchestrator::logger;
use fleet_orchestrator::orchestrator;

fn main() {
    logger::install_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Service(args) => orchestrator::run_service(args),
        Command::TestTemplates(args) => orchestrator::run_test_templates(args),
        Command::Delete(args) => orchestrator::run_delete(args),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "run failed");
        std::process::exit(1);
    }
}
