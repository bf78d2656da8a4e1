use crate::errors::ConfigError;
use crate::renderer::render;
use serde_json::{Map, Value};

/// The result of computing a single service/task's variable scope:
/// `service_config` is the merged raw config used to read typed fields
/// (`cluster`, `desiredCount`, ...); `variables` is the fully-resolved,
/// self-rendered variable bag used to expand `{{...}}` references anywhere
/// in the task-definition template.
pub struct Scope {
    pub service_config: Map<String, Value>,
    pub variables: Map<String, Value>,
}

/// Computes the layered variable scope for one named service/task, in
/// precedence order low -> high:
///
/// 1. base service/task config (excluding nested `vars`)
/// 2. base `vars`
/// 3. environment config (top-level)
/// 4. environment's per-item override (`environment_config[group_key][item_name]`)
/// 5. environment's per-item `vars`
///
/// The merged mapping is then recursively rendered against itself (to allow
/// var-refers-to-var), matching the two-pass `render(dump(variables), variables)`
/// idiom of the host tool this was ported from.
pub fn compute_scope(
    item_name: &str,
    base_config: &Map<String, Value>,
    environment_config: &Map<String, Value>,
    group_key: &str,
    include_process_env: bool,
) -> Result<Scope, ConfigError> {
    let mut variables = Map::new();
    variables.insert("item".to_string(), Value::String(item_name.to_string()));

    let mut service_config = base_config.clone();

    // 1. base config, excluding `vars`
    for (k, v) in base_config {
        if k != "vars" {
            variables.insert(k.clone(), v.clone());
        }
    }

    // 2. base vars
    if let Some(Value::Object(base_vars)) = base_config.get("vars") {
        for (k, v) in base_vars {
            variables.insert(k.clone(), v.clone());
        }
    }

    // 3. environment config, top-level
    for (k, v) in environment_config {
        variables.insert(k.clone(), v.clone());
    }

    // 4 & 5. per-item override and its `vars`
    if let Some(Value::Object(group)) = environment_config.get(group_key) {
        if let Some(Value::Object(item_override)) = group.get(item_name) {
            for (k, v) in item_override {
                if k != "vars" {
                    variables.insert(k.clone(), v.clone());
                }
                service_config.insert(k.clone(), v.clone());
            }
            if let Some(Value::Object(env_vars)) = item_override.get("vars") {
                for (k, v) in env_vars {
                    variables.insert(k.clone(), v.clone());
                }
            }
        }
    }

    let dumped = serde_json::to_string(&variables).map_err(|e| ConfigError::Json {
        path: format!("<variables for {item_name}>"),
        source: std::sync::Arc::new(e),
    })?;
    let rendered = render(&dumped, &variables, include_process_env)?;
    let rerendered: Value = serde_json::from_str(&rendered).map_err(|e| ConfigError::Json {
        path: format!("<rendered variables for {item_name}>"),
        source: std::sync::Arc::new(e),
    })?;
    if let Value::Object(m) = rerendered {
        variables = m;
    }

    Ok(Scope {
        service_config,
        variables,
    })
}

/// Renders a single scalar config field (as the python original did per-field
/// via `render.render_template(str(value), variables, env)`), returning the
/// rendered string.
pub fn render_field(value: &Value, variables: &Map<String, Value>, include_process_env: bool) -> Result<String, ConfigError> {
    let as_str = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(render(&as_str, variables, include_process_env)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn scope_layers_in_precedence_order() {
        let base = map(json!({
            "cluster": "{{cluster_name}}",
            "vars": {"cluster_name": "base-cluster", "tier": "base-tier"}
        }));
        let env_config = map(json!({
            "environment": "stg",
            "services": {
                "api": {
                    "vars": {"tier": "override-tier"}
                }
            }
        }));

        let scope = compute_scope("api", &base, &env_config, "services", false).unwrap();
        assert_eq!(scope.variables.get("environment").unwrap(), "stg");
        assert_eq!(scope.variables.get("tier").unwrap(), "override-tier");
        assert_eq!(scope.variables.get("cluster").unwrap(), "base-cluster");
    }

    #[test]
    fn self_render_resolves_var_refers_to_var() {
        let base = map(json!({
            "vars": {"base_name": "api", "full_name": "{{base_name}}-service"}
        }));
        let env_config = map(json!({}));

        let scope = compute_scope("api", &base, &env_config, "services", false).unwrap();
        assert_eq!(scope.variables.get("full_name").unwrap(), "api-service");
    }
}
