use crate::errors::ConfigError;
use crate::model::task_definition::TaskDefinition;
use crate::model::Service;
use crate::renderer::render_json;
use serde_json::{Map, Value};
use std::path::Path;

/// Loads the legacy `task-definition-template-dir` + `task-definition-config-json`
/// pair: one JSON template per file (family = file stem), rendered against a
/// single flat config JSON shared by every family. No per-service variable
/// scopes, no `stopBeforeDeploy`/`placementStrategy`/`loadBalancers` support.
pub fn load_services(template_dir: &Path, config_json_path: &Path, include_process_env: bool) -> Result<Vec<Service>, ConfigError> {
    let config_text = read_to_string(config_json_path)?;
    let config: Value = serde_json::from_str(&config_text).map_err(|e| ConfigError::Json {
        path: config_json_path.display().to_string(),
        source: std::sync::Arc::new(e),
    })?;
    let variables: Map<String, Value> = config.as_object().cloned().unwrap_or_default();

    let mut out = Vec::new();
    let entries = std::fs::read_dir(template_dir).map_err(|e| ConfigError::Io {
        path: template_dir.display().to_string(),
        source: std::sync::Arc::new(e),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: template_dir.display().to_string(),
            source: std::sync::Arc::new(e),
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let family = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let template_text = read_to_string(&path)?;

        let mut item_variables = variables.clone();
        item_variables.insert("item".to_string(), Value::String(family.clone()));

        let rendered = render_json(&template_text, &item_variables, include_process_env)?;
        let task_definition = TaskDefinition::from_rendered_json(family.clone(), rendered)?;
        let task_environment = task_definition.service_task_environment()?;

        out.push(Service::new(family, task_environment, task_definition, vec![], vec![], vec![], false, false));
    }

    out.sort_by(|a, b| a.family.cmp(&b.family));
    Ok(out)
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

    #[test]
    fn renders_one_family_per_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"environment": "stg", "cluster": "main"}"#).unwrap();

        let templates_dir = dir.path().join("templates");
        fs::create_dir(&templates_dir).unwrap();
        fs::write(
            templates_dir.join("api.json"),
            r#"{"containerDefinitions": [{"name": "api", "environment": [
                {"name": "ENVIRONMENT", "value": "{{environment}}"},
                {"name": "CLUSTER_NAME", "value": "{{cluster}}"},
                {"name": "DESIRED_COUNT", "value": "2"}
            ]}]}"#,
        )
        .unwrap();

        let services = load_services(&templates_dir, &config_path, false).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].family, "api");
        assert!(!services[0].stop_before_deploy);
        assert!(services[0].placement_strategy.is_empty());
    }
}
