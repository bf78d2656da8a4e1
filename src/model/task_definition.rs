use crate::errors::ModelError;
use crate::model::task_environment::{EnvironmentEntry, TaskEnvironment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque, versioned record identified by a `familyName:revision -> arn`.
///
/// Carries an ordered list of container definitions (each an arbitrary
/// mapping of keys to scalars/lists/nested mappings). Immutable once
/// registered; a new call to `register` always produces a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    pub container_definitions: Vec<Map<String, Value>>,
    /// Populated once registered with the control plane.
    pub arn: Option<String>,
}

impl TaskDefinition {
    pub fn from_rendered_json(family: String, rendered: Value) -> Result<Self, ModelError> {
        let container_definitions = rendered
            .get("containerDefinitions")
            .and_then(Value::as_array)
            .ok_or(ModelError::MissingField("containerDefinitions"))?
            .iter()
            .map(|v| v.as_object().cloned().ok_or(ModelError::MissingField("containerDefinitions[]")))
            .collect::<Result<Vec<_>, _>>()?;

        if container_definitions.is_empty() {
            return Err(ModelError::EmptyContainerDefinitions);
        }

        Ok(TaskDefinition {
            family,
            container_definitions,
            arn: None,
        })
    }

    /// Extracts the decoded `environment` list from the first container
    /// definition, as the control plane and this tool both key identity off.
    pub fn first_container_environment(&self) -> Result<Vec<EnvironmentEntry>, ModelError> {
        let first = self
            .container_definitions
            .first()
            .ok_or(ModelError::EmptyContainerDefinitions)?;

        let entries = first
            .get("environment")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| {
                        let name = e.get("name")?.as_str()?.to_string();
                        let value = e.get("value")?.as_str()?.to_string();
                        Some(EnvironmentEntry { name, value })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(entries)
    }

    pub fn service_task_environment(&self) -> Result<TaskEnvironment, ModelError> {
        TaskEnvironment::from_service_environment(&self.first_container_environment()?)
    }

    pub fn scheduled_task_environment(&self) -> Result<TaskEnvironment, ModelError> {
        TaskEnvironment::from_scheduled_task_environment(&self.first_container_environment()?)
    }
}
