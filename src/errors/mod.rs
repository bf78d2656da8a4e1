use thiserror::Error;

/// Errors raised while loading `services.yaml` / `environment.yaml` (or the legacy
/// templates-dir + config.json pair) and while computing variable scopes.
///
/// Config errors are always fatal at load time: no partial deploy proceeds.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("`{service}` requires parameter `{parameter}`")]
    ParameterNotFound { service: String, parameter: String },

    #[error("`{service}` parameter `{parameter}` must be {expected}, got `{value}`")]
    ParameterInvalid {
        service: String,
        parameter: String,
        expected: String,
        value: String,
    },

    #[error("variable `{0}` is undefined")]
    VariableNotFound(String),

    #[error("environment-yaml requires parameter `environment`")]
    EnvironmentValueNotFound,

    #[error("task definition template `{0}` not found")]
    TemplateNotFound(String),

    #[error("duplicate family name `{0}` across services and scheduled tasks")]
    DuplicateFamilyName(String),

    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::sync::Arc<std::io::Error>,
    },

    #[error("failed to parse YAML `{path}`: {source}")]
    Yaml {
        path: String,
        #[source]
        source: std::sync::Arc<serde_yaml::Error>,
    },

    #[error("failed to parse JSON `{path}`: {source}")]
    Json {
        path: String,
        #[source]
        source: std::sync::Arc<serde_json::Error>,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors raised by the pure template renderer. These always
/// indicate an author-side template mistake, never a transient condition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("undefined variable referenced in template: {0}")]
    UndefinedVariable(String),

    #[error("template error: {0}")]
    Tera(String),

    #[error("rendered template is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Errors raised while parsing a `TaskEnvironment` out of a container definition,
/// or while diffing/validating the domain model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("task definition is missing required environment variable `{0}`")]
    MissingEnvironmentValue(&'static str),

    #[error("task definition has no container definitions")]
    EmptyContainerDefinitions,

    #[error("task definition is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Errors surfaced by the `CloudApi` capability boundary.
///
/// Only throttling and not-found conditions are ever produced here directly by
/// application logic: throttling is swallowed by the centralized retry helper
/// before it reaches a caller, and not-found is converted into the typed misses
/// below so callers can branch on "will be created" semantics. Everything else
/// is a `Transport` error wrapping whatever the underlying SDK returned.
#[derive(Debug, Error, Clone)]
pub enum CloudApiError {
    #[error("cluster `{0}` not found")]
    NotFound(String),

    #[error("service `{service}` failure in cluster `{cluster}`: {reason}")]
    ServiceNotFound {
        cluster: String,
        service: String,
        reason: String,
    },

    #[error("cloudwatch rule `{0}` not found")]
    CloudwatchRuleNotFound(String),

    #[error("task definition `{0}` is inactive")]
    TaskDefinitionInactive(String),

    #[error("waiter for `{cluster}/{service}` timed out after {attempts} attempts")]
    WaiterTimeout {
        cluster: String,
        service: String,
        attempts: u32,
    },

    #[error("control plane request throttled")]
    Throttled,

    #[error("control plane request failed: {0}")]
    Transport(String),
}

/// Top-level orchestrator error: everything that can abort a run before or
/// outside of per-record failure isolation (see `engine::RecordStatus` for
/// the record-scoped counterpart).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CloudApi(#[from] CloudApiError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("user declined the interactive confirmation")]
    ConfirmationDeclined,

    #[error("{0}")]
    Other(String),
}
