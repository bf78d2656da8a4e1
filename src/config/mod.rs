pub mod legacy;
pub mod vars;
pub mod yaml;

use crate::errors::ConfigError;
use crate::model::{Identified, ScheduledTask, Service};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// The fully-loaded, fully-rendered desired-state universe:
/// `all_services[]` and `all_scheduled_tasks[]`, before group filtering.
pub struct LoadedConfig {
    pub services: Vec<Service>,
    pub scheduled_tasks: Vec<ScheduledTask>,
}

impl LoadedConfig {
    /// Loads the modern configuration: `services.yaml` + `environment.yaml`.
    pub fn load_modern(services_yaml_path: &Path, environment_yaml_path: &Path, include_process_env: bool) -> Result<Self, ConfigError> {
        let services_text = read_to_string(services_yaml_path)?;
        let environment_text = read_to_string(environment_yaml_path)?;

        let services_yaml = yaml::ServicesYaml::parse(&services_text, &services_yaml_path.display().to_string())?;

        let environment_config: Value = serde_yaml::from_str(&environment_text).map_err(|e| ConfigError::Yaml {
            path: environment_yaml_path.display().to_string(),
            source: std::sync::Arc::new(e),
        })?;
        let environment_config = environment_config.as_object().cloned().unwrap_or_default();

        if !environment_config.contains_key("environment") {
            return Err(ConfigError::EnvironmentValueNotFound);
        }

        let services = yaml::load_services(&services_yaml, &environment_config, include_process_env)?;
        let scheduled_tasks = yaml::load_scheduled_tasks(&services_yaml, &environment_config, include_process_env)?;

        check_duplicate_families(&services, &scheduled_tasks)?;

        Ok(LoadedConfig { services, scheduled_tasks })
    }

    /// Loads the legacy templates-dir + config-json pair.
    pub fn load_legacy(template_dir: &Path, config_json_path: &Path, include_process_env: bool) -> Result<Self, ConfigError> {
        let services = legacy::load_services(template_dir, config_json_path, include_process_env)?;
        check_duplicate_families(&services, &[])?;
        Ok(LoadedConfig {
            services,
            scheduled_tasks: Vec::new(),
        })
    }

    /// Intersects the loaded universe with the optional `--template-group` /
    /// `--deploy-service-group` filters, matched against the values
    /// derived from each record's rendered `TaskEnvironment`.
    pub fn deploy_targets(&self, template_group: Option<&str>, deploy_service_group: Option<&str>) -> (Vec<&Service>, Vec<&ScheduledTask>) {
        let services = self
            .services
            .iter()
            .filter(|s| matches_group(template_group, s.task_environment.template_group.as_deref()))
            .filter(|s| matches_group(deploy_service_group, s.task_environment.service_group.as_deref()))
            .collect();
        let scheduled_tasks = self
            .scheduled_tasks
            .iter()
            .filter(|t| matches_group(template_group, t.task_environment.template_group.as_deref()))
            .filter(|t| matches_group(deploy_service_group, t.task_environment.service_group.as_deref()))
            .collect();
        (services, scheduled_tasks)
    }
}

fn matches_group(filter: Option<&str>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => value == Some(f),
    }
}

fn check_duplicate_families(services: &[Service], scheduled_tasks: &[ScheduledTask]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for family in services.iter().map(Identified::family).chain(scheduled_tasks.iter().map(Identified::family)) {
        if !seen.insert(family) {
            return Err(ConfigError::DuplicateFamilyName(family.to_string()));
        }
    }
    Ok(())
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: std::sync::Arc::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_modern_fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let services_path = dir.join("services.yaml");
        fs::write(
            &services_path,
            r#"
taskDefinitionTemplates:
  api-template: |
    {"containerDefinitions": [{"name": "api", "environment": [
      {"name": "ENVIRONMENT", "value": "{{environment}}"},
      {"name": "CLUSTER_NAME", "value": "{{cluster}}"},
      {"name": "DESIRED_COUNT", "value": "{{desiredCount}}"}
    ]}]}
services:
  api:
    cluster: main
    desiredCount: 2
    taskDefinitionTemplate: api-template
  worker:
    cluster: main
    desiredCount: 1
    taskDefinitionTemplate: api-template
"#,
        )
        .unwrap();

        let environment_path = dir.join("environment.yaml");
        fs::write(&environment_path, "environment: stg\n").unwrap();

        (services_path, environment_path)
    }

    #[test]
    fn loads_modern_config_with_two_services() {
        let dir = tempfile::tempdir().unwrap();
        let (services_path, environment_path) = write_modern_fixture(dir.path());

        let config = LoadedConfig::load_modern(&services_path, &environment_path, false).unwrap();
        assert_eq!(config.services.len(), 2);
        assert!(config.scheduled_tasks.is_empty());
    }

    #[test]
    fn missing_environment_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (services_path, _) = write_modern_fixture(dir.path());
        let environment_path = dir.path().join("environment.yaml");
        fs::write(&environment_path, "unrelated: true\n").unwrap();

        let err = LoadedConfig::load_modern(&services_path, &environment_path, false).unwrap_err();
        assert_eq!(err, ConfigError::EnvironmentValueNotFound);
    }

    #[test]
    fn duplicate_family_across_services_and_tasks_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let services_path = dir.path().join("services.yaml");
        fs::write(
            &services_path,
            r#"
taskDefinitionTemplates:
  api-template: |
    {"containerDefinitions": [{"name": "api", "environment": [
      {"name": "ENVIRONMENT", "value": "{{environment}}"},
      {"name": "CLUSTER_NAME", "value": "{{cluster}}"},
      {"name": "DESIRED_COUNT", "value": "1"}
    ]}]}
  task-template: |
    {"containerDefinitions": [{"name": "api", "environment": [
      {"name": "ENVIRONMENT", "value": "{{environment}}"},
      {"name": "CLUSTER_NAME", "value": "{{cluster}}"},
      {"name": "TASK_COUNT", "value": "1"},
      {"name": "TARGET_LAMBDA_ARN", "value": "arn:aws:lambda:x"}
    ]}]}
services:
  api:
    cluster: main
    desiredCount: 1
    taskDefinitionTemplate: api-template
scheduledTasks:
  api:
    cluster: main
    taskCount: 1
    taskDefinitionTemplate: task-template
    cloudwatchEvent:
      scheduleExpression: "rate(1 hour)"
      targetLambdaArn: "arn:aws:lambda:x"
"#,
        )
        .unwrap();
        let environment_path = dir.path().join("environment.yaml");
        fs::write(&environment_path, "environment: stg\n").unwrap();

        let err = LoadedConfig::load_modern(&services_path, &environment_path, false).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateFamilyName("api".to_string()));
    }

    #[test]
    fn deploy_targets_filters_by_template_group() {
        let dir = tempfile::tempdir().unwrap();
        let (services_path, environment_path) = write_modern_fixture(dir.path());
        let config = LoadedConfig::load_modern(&services_path, &environment_path, false).unwrap();

        // no records carry a TEMPLATE_GROUP, so an explicit filter excludes all.
        let (services, _) = config.deploy_targets(Some("frontend"), None);
        assert!(services.is_empty());

        let (services, _) = config.deploy_targets(None, None);
        assert_eq!(services.len(), 2);
    }
}
