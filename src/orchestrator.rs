use crate::cli::{Credentials, DeleteArgs, ServiceArgs, TestTemplatesArgs};
use crate::cloud_api::aws::AwsCloudApi;
use crate::cloud_api::CloudApi;
use crate::config::LoadedConfig;
use crate::engine::reconcile::{Engine, EngineConfig, RunReport};
use crate::errors::OrchestratorError;
use crate::model::{Identified, Service};
use rusoto_core::Region;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level driver: wires CloudApi + Config Loader + Engine
/// and implements the `service` / `test-templates` / `delete` modes.

/// Builds a `Fn() -> Box<dyn CloudApi>` factory, invoked once per worker
/// thread: each worker gets its own ECS /
/// CloudWatch Events / Lambda client trio sharing one region and credentials.
fn cloud_api_factory(credentials: &Credentials) -> Result<impl Fn() -> Box<dyn CloudApi> + Sync, OrchestratorError> {
    let region = Region::from_str(&credentials.region).map_err(|e| OrchestratorError::Other(e.to_string()))?;
    let key = credentials.key.clone();
    let secret = credentials.secret.clone();
    Ok(move || Box::new(AwsCloudApi::new(region.clone(), &key, &secret).expect("constructing per-worker CloudApi client")) as Box<dyn CloudApi>)
}

fn load_config(
    services_yaml: Option<&Path>,
    environment_yaml: Option<&Path>,
    task_definition_template_dir: Option<&Path>,
    task_definition_config_json: Option<&Path>,
    include_process_env: bool,
) -> Result<LoadedConfig, OrchestratorError> {
    match (services_yaml, environment_yaml) {
        (Some(services_yaml), Some(environment_yaml)) => Ok(LoadedConfig::load_modern(services_yaml, environment_yaml, include_process_env)?),
        _ => {
            let template_dir = task_definition_template_dir
                .ok_or_else(|| OrchestratorError::Other("--task-definition-template-dir is required in legacy mode".to_string()))?;
            let config_json = task_definition_config_json
                .ok_or_else(|| OrchestratorError::Other("--task-definition-config-json is required in legacy mode".to_string()))?;
            Ok(LoadedConfig::load_legacy(template_dir, config_json, include_process_env)?)
        }
    }
}

/// Default placement strategy injected by `--placement-strategy-binpack-first`:
/// pack tasks as densely as possible, then spread across availability zones.
fn default_binpack_first_strategy() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({"type": "binpack", "field": "cpu"}),
        serde_json::json!({"type": "spread", "field": "attribute:ecs.availability-zone"}),
    ]
}

fn apply_default_placement_strategy(services: &mut [Service], enabled: bool) {
    if !enabled {
        return;
    }
    for service in services.iter_mut() {
        if service.placement_strategy.is_empty() {
            service.placement_strategy = default_binpack_first_strategy();
        }
    }
}

/// Runs the `service` mode: full reconciliation pipeline, or `--dry-run`, or
/// `--test` (load-only).
pub fn run_service(args: ServiceArgs) -> Result<(), OrchestratorError> {
    let loaded = load_config(
        args.services_yaml.as_deref(),
        args.environment_yaml.as_deref(),
        args.task_definition_template_dir.as_deref(),
        args.task_definition_config_json.as_deref(),
        args.task_definition_config_env(),
    )?;

    let (services, scheduled_tasks) = loaded.deploy_targets(args.template_group.as_deref(), args.deploy_service_group.as_deref());
    let mut services: Vec<Service> = services.into_iter().cloned().collect();
    let scheduled_tasks: Vec<_> = scheduled_tasks.into_iter().cloned().collect();
    apply_default_placement_strategy(&mut services, args.placement_strategy_binpack_first());

    if args.test {
        info!(services = services.len(), scheduled_tasks = scheduled_tasks.len(), "loaded configuration (--test, no cloud calls issued)");
        return Ok(());
    }

    let engine_config = EngineConfig {
        threads_count: args.credentials.threads_count,
        service_wait_delay: Duration::from_secs(args.service_wait_delay),
        service_wait_max_attempts: args.service_wait_max_attempts,
        service_zero_keep: args.service_zero_keep(),
        stop_before_deploy_enabled: args.stop_before_deploy(),
        delete_unused_service: args.delete_unused_service(),
    };
    let engine = Engine::new(engine_config, cloud_api_factory(&args.credentials)?);

    if args.dry_run {
        let report = engine.dry_run(services, scheduled_tasks)?;
        log_report(&report);
        return Ok(());
    }

    let report = engine.run(services, scheduled_tasks)?;
    log_report(&report);
    if !report.is_success() {
        return Err(OrchestratorError::Other("one or more records failed; see logs above".to_string()));
    }
    Ok(())
}

fn log_report(report: &RunReport) {
    for record in &report.services {
        info!(family = %record.family, status = ?record.status, "service reconciled");
    }
    for record in &report.scheduled_tasks {
        info!(family = %record.family, status = ?record.status, "scheduled task reconciled");
    }
}

/// Runs the `test-templates` mode: load every `environment.yaml` in a
/// directory (or the single legacy config) and report pass/fail counts.
/// Issues no cloud calls; intended to catch template authoring bugs in CI.
pub fn run_test_templates(args: TestTemplatesArgs) -> Result<(), OrchestratorError> {
    let mut passed = 0usize;
    let mut failed = 0usize;

    match (&args.services_yaml, &args.environment_yaml_dir) {
        (Some(services_yaml), Some(environment_yaml_dir)) => {
            let mut entries: Vec<_> = std::fs::read_dir(environment_yaml_dir)
                .map_err(|e| OrchestratorError::Other(format!("reading {}: {e}", environment_yaml_dir.display())))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("yaml"))
                .collect();
            entries.sort();

            for environment_yaml in entries {
                match LoadedConfig::load_modern(services_yaml, &environment_yaml, args.task_definition_config_env()) {
                    Ok(loaded) => {
                        info!(
                            environment_yaml = %environment_yaml.display(),
                            services = loaded.services.len(),
                            scheduled_tasks = loaded.scheduled_tasks.len(),
                            "template set renders cleanly"
                        );
                        passed += 1;
                    }
                    Err(err) => {
                        error!(environment_yaml = %environment_yaml.display(), error = %err, "template set failed to render");
                        failed += 1;
                    }
                }
            }
        }
        _ => {
            let template_dir = args
                .task_definition_template_dir
                .as_deref()
                .ok_or_else(|| OrchestratorError::Other("--task-definition-template-dir is required in legacy mode".to_string()))?;
            let config_json = args
                .task_definition_config_json
                .as_deref()
                .ok_or_else(|| OrchestratorError::Other("--task-definition-config-json is required in legacy mode".to_string()))?;
            match LoadedConfig::load_legacy(template_dir, config_json, args.task_definition_config_env()) {
                Ok(loaded) => {
                    info!(services = loaded.services.len(), "legacy template set renders cleanly");
                    passed += 1;
                }
                Err(err) => {
                    error!(error = %err, "legacy template set failed to render");
                    failed += 1;
                }
            }
        }
    }

    info!(passed, failed, "test-templates finished");
    if failed > 0 {
        return Err(OrchestratorError::Other(format!("{failed} template set(s) failed to render")));
    }
    Ok(())
}

/// Runs the `delete` mode: enumerate every live service and rule this tool
/// manages, ask for interactive confirmation, then tear them all down.
pub fn run_delete(args: DeleteArgs) -> Result<(), OrchestratorError> {
    let api = cloud_api_factory(&args.credentials)?();

    let clusters = api.list_clusters()?;
    let mut live_services = Vec::new();
    for cluster in &clusters {
        for service_name in api.list_services(cluster)? {
            live_services.push((cluster.clone(), service_name));
        }
    }
    let live_rules = api.list_cloudwatch_rules()?;

    if live_services.is_empty() && live_rules.is_empty() {
        info!(environment = %args.environment, "nothing to delete");
        return Ok(());
    }

    println!("The following resources will be permanently deleted:");
    for (cluster, service_name) in &live_services {
        println!("  service  {cluster}/{service_name}");
    }
    for rule in &live_rules {
        println!("  rule     {}", rule.name);
    }
    print!("Proceed? [y/N] ");
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).map_err(|e| OrchestratorError::Other(e.to_string()))?;
    if answer.trim().to_lowercase() != "y" {
        return Err(OrchestratorError::ConfirmationDeclined);
    }

    for (cluster, service_name) in &live_services {
        if let Err(err) = api.update_service(cluster, service_name, Some(0), "") {
            warn!(cluster = %cluster, service = %service_name, error = %err, "failed to scale down before delete, deleting anyway");
        } else if let Err(err) = api.wait_for_stable(cluster, service_name, Duration::from_secs(10), 30) {
            warn!(cluster = %cluster, service = %service_name, error = %err, "wait-for-stable before delete failed, deleting anyway");
        }
        if let Err(err) = api.delete_service(cluster, service_name) {
            error!(cluster = %cluster, service = %service_name, error = %err, "failed to delete service");
        }
    }
    for rule in &live_rules {
        if let Err(err) = api.remove_targets(&rule.name) {
            warn!(rule = %rule.name, error = %err, "failed to remove targets");
        }
        if let Err(err) = api.delete_rule(&rule.name) {
            error!(rule = %rule.name, error = %err, "failed to delete rule");
        }
    }

    Ok(())
}
