use crate::config::vars::{compute_scope, render_field};
use crate::errors::ConfigError;
use crate::model::service::{LoadBalancer, PlacementConstraint, PlacementStrategy};
use crate::model::task_definition::TaskDefinition;
use crate::model::task_environment::TaskEnvironment;
use crate::model::{ScheduledTask, Service};
use crate::renderer::render_json;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Parsed `services.yaml`: the raw, unrendered template library and config maps.
pub struct ServicesYaml {
    pub task_definition_templates: HashMap<String, String>,
    pub services: Map<String, Value>,
    pub scheduled_tasks: Map<String, Value>,
}

impl ServicesYaml {
    pub fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Yaml {
            path: path.to_string(),
            source: std::sync::Arc::new(e),
        })?;

        let templates = root
            .get("taskDefinitionTemplates")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect();

        let services = root.get("services").and_then(Value::as_object).cloned().unwrap_or_default();
        let scheduled_tasks = root
            .get("scheduledTasks")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(ServicesYaml {
            task_definition_templates: templates,
            services,
            scheduled_tasks,
        })
    }
}

fn require<'a>(config: &'a Map<String, Value>, service: &str, key: &str) -> Result<&'a Value, ConfigError> {
    config.get(key).ok_or_else(|| ConfigError::ParameterNotFound {
        service: service.to_string(),
        parameter: key.to_string(),
    })
}

fn invalid(service: &str, key: &str, expected: &str, value: &Value) -> ConfigError {
    ConfigError::ParameterInvalid {
        service: service.to_string(),
        parameter: key.to_string(),
        expected: expected.to_string(),
        value: value.to_string(),
    }
}

fn as_string(value: &Value, service: &str, key: &str) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(service, key, "a string", value))
}

fn as_u32(value: &Value, service: &str, key: &str) -> Result<u32, ConfigError> {
    if let Some(n) = value.as_u64() {
        return Ok(n as u32);
    }
    if let Some(s) = value.as_str() {
        if let Ok(n) = s.parse::<u32>() {
            return Ok(n);
        }
    }
    Err(invalid(service, key, "an integer", value))
}

fn as_bool(value: &Value, service: &str, key: &str) -> Result<bool, ConfigError> {
    if let Some(b) = value.as_bool() {
        return Ok(b);
    }
    if let Some(s) = value.as_str() {
        match s.to_ascii_lowercase().as_str() {
            "true" => return Ok(true),
            "false" => return Ok(false),
            _ => {}
        }
    }
    Err(invalid(service, key, "a boolean", value))
}

fn optional_bool(config: &Map<String, Value>, service: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
    match config.get(key) {
        None => Ok(default),
        Some(v) => as_bool(v, service, key),
    }
}

fn optional_u32(config: &Map<String, Value>, service: &str, key: &str) -> Result<Option<u32>, ConfigError> {
    match config.get(key) {
        None => Ok(None),
        Some(v) => as_u32(v, service, key).map(Some),
    }
}

fn optional_array(config: &Map<String, Value>, key: &str) -> Vec<Value> {
    config.get(key).and_then(Value::as_array).cloned().unwrap_or_default()
}

/// Loads every non-disabled service, with its variable scope already resolved
/// and its task definition already rendered.
pub fn load_services(
    services_yaml: &ServicesYaml,
    environment_config: &Map<String, Value>,
    include_process_env: bool,
) -> Result<Vec<Service>, ConfigError> {
    let mut out = Vec::new();
    for name in services_yaml.services.keys() {
        let base_config = services_yaml.services.get(name).and_then(Value::as_object).cloned().unwrap_or_default();

        if optional_bool(&base_config, name, "disabled", false)? {
            continue;
        }

        let scope = compute_scope(name, &base_config, environment_config, "services", include_process_env)?;
        let config = &scope.service_config;

        let cluster = as_string(require(config, name, "cluster")?, name, "cluster")?;
        let desired_count = as_u32(require(config, name, "desiredCount")?, name, "desiredCount")?;
        let template_name = as_string(require(config, name, "taskDefinitionTemplate")?, name, "taskDefinitionTemplate")?;
        let minimum_healthy_percent = optional_u32(config, name, "minimumHealthyPercent")?;
        let maximum_percent = optional_u32(config, name, "maximumPercent")?;
        let distinct_instance = optional_bool(config, name, "distinctInstance", false)?;
        if let Some(registrator) = config.get("registrator") {
            as_bool(registrator, name, "registrator")?;
        }
        let stop_before_deploy = optional_bool(config, name, "stopBeforeDeploy", false)?;
        let is_primary_placement = optional_bool(config, name, "isPrimaryPlacement", false)?;

        let placement_strategy: Vec<PlacementStrategy> = optional_array(config, "placementStrategy");
        let placement_constraints: Vec<PlacementConstraint> = optional_array(config, "placementConstraints");
        let load_balancers: Vec<LoadBalancer> = optional_array(config, "loadBalancers");

        let mut variables = scope.variables.clone();
        variables.insert("cluster".to_string(), Value::String(cluster.clone()));
        variables.insert("desiredCount".to_string(), Value::Number(desired_count.into()));
        if let Some(v) = minimum_healthy_percent {
            variables.insert("minimumHealthyPercent".to_string(), Value::Number(v.into()));
        }
        if let Some(v) = maximum_percent {
            variables.insert("maximumPercent".to_string(), Value::Number(v.into()));
        }

        let template_text = services_yaml
            .task_definition_templates
            .get(&template_name)
            .ok_or_else(|| ConfigError::TemplateNotFound(template_name.clone()))?;
        let template_text = render_field(&Value::String(template_text.clone()), &variables, include_process_env)?;
        let rendered = render_json(&template_text, &variables, include_process_env)?;

        let task_definition = TaskDefinition::from_rendered_json(name.clone(), rendered)?;
        let mut task_environment = task_definition.service_task_environment()?;
        if let Some(v) = minimum_healthy_percent {
            task_environment.minimum_healthy_percent = v;
        }
        if let Some(v) = maximum_percent {
            task_environment.maximum_percent = v;
        }
        task_environment.distinct_instance = distinct_instance;

        let _ = cluster; // cluster is carried on task_environment.cluster_name, sourced from the rendered environment block

        out.push(Service::new(
            name.clone(),
            task_environment,
            task_definition,
            placement_strategy,
            placement_constraints,
            load_balancers,
            stop_before_deploy,
            is_primary_placement,
        ));
    }
    Ok(out)
}

/// Loads every scheduled task, analogous to [`load_services`].
pub fn load_scheduled_tasks(
    services_yaml: &ServicesYaml,
    environment_config: &Map<String, Value>,
    include_process_env: bool,
) -> Result<Vec<ScheduledTask>, ConfigError> {
    let mut out = Vec::new();
    for name in services_yaml.scheduled_tasks.keys() {
        let base_config = services_yaml
            .scheduled_tasks
            .get(name)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if optional_bool(&base_config, name, "disabled", false)? {
            continue;
        }

        let scope = compute_scope(name, &base_config, environment_config, "scheduledTasks", include_process_env)?;
        let config = &scope.service_config;

        let task_count = as_u32(require(config, name, "taskCount")?, name, "taskCount")?;
        let template_name = as_string(require(config, name, "taskDefinitionTemplate")?, name, "taskDefinitionTemplate")?;
        let cloudwatch_event = config
            .get("cloudwatchEvent")
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::ParameterNotFound {
                service: name.clone(),
                parameter: "cloudwatchEvent".to_string(),
            })?;
        let schedule_expression = as_string(
            require(cloudwatch_event, name, "scheduleExpression")?,
            name,
            "cloudwatchEvent.scheduleExpression",
        )?;
        let target_lambda_arn = as_string(
            require(cloudwatch_event, name, "targetLambdaArn")?,
            name,
            "cloudwatchEvent.targetLambdaArn",
        )?;

        let placement_strategy: Vec<PlacementStrategy> = optional_array(config, "placementStrategy");

        let mut variables = scope.variables.clone();
        variables.insert("taskCount".to_string(), Value::Number(task_count.into()));
        variables.insert("targetLambdaArn".to_string(), Value::String(target_lambda_arn.clone()));

        let template_text = services_yaml
            .task_definition_templates
            .get(&template_name)
            .ok_or_else(|| ConfigError::TemplateNotFound(template_name.clone()))?;
        let template_text = render_field(&Value::String(template_text.clone()), &variables, include_process_env)?;
        let rendered = render_json(&template_text, &variables, include_process_env)?;

        let task_definition = TaskDefinition::from_rendered_json(name.clone(), rendered)?;
        let task_environment: TaskEnvironment = task_definition.scheduled_task_environment()?;

        out.push(ScheduledTask::new(
            name.clone(),
            task_environment,
            task_definition,
            schedule_expression,
            target_lambda_arn,
            placement_strategy,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn services_yaml() -> ServicesYaml {
        ServicesYaml::parse(
            r#"
taskDefinitionTemplates:
  api-template: |
    {"containerDefinitions": [{"name": "api", "image": "app:{{tag}}", "environment": [
      {"name": "ENVIRONMENT", "value": "{{environment}}"},
      {"name": "CLUSTER_NAME", "value": "{{cluster}}"},
      {"name": "DESIRED_COUNT", "value": "{{desiredCount}}"}
    ]}]}
services:
  api:
    cluster: main
    desiredCount: 2
    taskDefinitionTemplate: api-template
    vars:
      tag: v1
"#,
            "services.yaml",
        )
        .unwrap()
    }

    #[test]
    fn loads_single_service_end_to_end() {
        let yaml = services_yaml();
        let env_config = json!({"environment": "stg"}).as_object().unwrap().clone();
        let services = load_services(&yaml, &env_config, false).unwrap();
        assert_eq!(services.len(), 1);
        let svc = &services[0];
        assert_eq!(svc.family, "api");
        assert_eq!(svc.task_environment.cluster_name, "main");
        assert_eq!(svc.task_environment.environment, "stg");
        assert_eq!(svc.task_environment.desired_count, Some(2));
    }

    #[test]
    fn disabled_service_is_excluded() {
        let yaml = ServicesYaml::parse(
            r#"
taskDefinitionTemplates:
  t: '{"containerDefinitions": [{"name": "x"}]}'
services:
  api:
    cluster: main
    desiredCount: 1
    taskDefinitionTemplate: t
    disabled: true
"#,
            "services.yaml",
        )
        .unwrap();
        let env_config = Map::new();
        let services = load_services(&yaml, &env_config, false).unwrap();
        assert!(services.is_empty());
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let yaml = ServicesYaml::parse(
            r#"
taskDefinitionTemplates:
  t: '{"containerDefinitions": []}'
services:
  api:
    desiredCount: 1
    taskDefinitionTemplate: t
"#,
            "services.yaml",
        )
        .unwrap();
        let env_config = Map::new();
        let err = load_services(&yaml, &env_config, false).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ParameterNotFound {
                service: "api".to_string(),
                parameter: "cluster".to_string()
            }
        );
    }
}
