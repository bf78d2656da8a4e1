use crate::errors::RenderError;
use crate::tera_filters;
use tera::{Context, Tera};

/// Pure template expander.
///
/// `render` is a pure function: given a template string, a variables mapping,
/// and an optional process-environment overlay, it produces a rendered string.
/// It never touches the filesystem and never mutates its inputs. Strict-undefined
/// semantics apply: any reference to an unbound variable fails with
/// `RenderError::UndefinedVariable` rather than silently rendering empty.
pub fn render(
    template_text: &str,
    variables: &serde_json::Map<String, serde_json::Value>,
    include_process_env: bool,
) -> Result<String, RenderError> {
    let mut context = Context::new();
    for (key, value) in variables {
        context.insert(key, value);
    }

    if include_process_env {
        for (key, value) in std::env::vars() {
            // process env is overlaid at the lowest precedence: never clobber an
            // explicitly-provided variable of the same name.
            if !variables.contains_key(&key) {
                context.insert(&key, &value);
            }
        }
    }

    let mut tera = Tera::default();
    tera_filters::register_all(&mut tera);

    tera.add_raw_template("__render", template_text)
        .map_err(tera_error_to_render_error)?;

    tera.render("__render", &context).map_err(tera_error_to_render_error)
}

/// Renders `template_text` and JSON-decodes the result, as required when the
/// template is a task-definition template.
pub fn render_json(
    template_text: &str,
    variables: &serde_json::Map<String, serde_json::Value>,
    include_process_env: bool,
) -> Result<serde_json::Value, RenderError> {
    let rendered = render(template_text, variables, include_process_env)?;
    serde_json::from_str(&rendered).map_err(|e| RenderError::InvalidJson(e.to_string()))
}

fn tera_error_to_render_error(err: tera::Error) -> RenderError {
    match &err.kind {
        tera::ErrorKind::Msg(msg) if msg.contains("is undefined") || msg.contains("not found in context") => {
            RenderError::UndefinedVariable(msg.clone())
        }
        _ => RenderError::Tera(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect()
    }

    #[test]
    fn renders_bound_variables_losslessly() {
        let variables = vars(&[("name", "api"), ("env", "stg")]);
        let out = render("{{name}}-{{env}}", &variables, false).unwrap();
        assert_eq!(out, "api-stg");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let variables = vars(&[]);
        let err = render("{{missing}}", &variables, false).unwrap_err();
        assert!(matches!(err, RenderError::UndefinedVariable(_)));
    }

    #[test]
    fn process_env_is_lowest_precedence() {
        // SAFETY: test-only, single-threaded within this test function's scope.
        unsafe {
            std::env::set_var("FLEET_ORCH_TEST_VAR", "from-env");
        }
        let variables = vars(&[("FLEET_ORCH_TEST_VAR", "from-vars")]);
        let out = render("{{FLEET_ORCH_TEST_VAR}}", &variables, true).unwrap();
        assert_eq!(out, "from-vars");
        unsafe {
            std::env::remove_var("FLEET_ORCH_TEST_VAR");
        }
    }

    #[test]
    fn render_json_decodes_result() {
        let variables = vars(&[("count", "3")]);
        let value = render_json(r#"{"desiredCount": {{count}}}"#, &variables, false).unwrap();
        assert_eq!(value, json!({"desiredCount": 3}));
    }
}
