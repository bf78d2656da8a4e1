use crate::errors::ModelError;
use serde::{Deserialize, Serialize};

/// A single `{name, value}` pair in a container definition's `environment`
/// list, as the control plane represents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub name: String,
    pub value: String,
}

/// The decoded identification contract carried in a task definition's first
/// container's `environment` list.
///
/// Required keys (`ENVIRONMENT`, `CLUSTER_NAME`, plus `DESIRED_COUNT` for
/// services or `TASK_COUNT`/`TARGET_LAMBDA_ARN` for scheduled tasks) cause
/// `ModelError::MissingEnvironmentValue` when absent; everything else is
/// optional and defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEnvironment {
    pub environment: String,
    pub cluster_name: String,
    pub service_group: Option<String>,
    pub template_group: Option<String>,
    pub desired_count: Option<u32>,
    pub task_count: Option<u32>,
    pub target_lambda_arn: Option<String>,
    pub minimum_healthy_percent: u32,
    pub maximum_percent: u32,
    pub distinct_instance: bool,
}

impl TaskEnvironment {
    /// Parses a service's environment list. Requires `ENVIRONMENT`,
    /// `CLUSTER_NAME`, and `DESIRED_COUNT`.
    pub fn from_service_environment(entries: &[EnvironmentEntry]) -> Result<Self, ModelError> {
        let raw = RawFields::collect(entries);
        let environment = raw.environment.ok_or(ModelError::MissingEnvironmentValue("ENVIRONMENT"))?;
        let cluster_name = raw.cluster_name.ok_or(ModelError::MissingEnvironmentValue("CLUSTER_NAME"))?;
        let desired_count = Some(
            raw.desired_count
                .ok_or(ModelError::MissingEnvironmentValue("DESIRED_COUNT"))?,
        );

        Ok(TaskEnvironment {
            environment,
            cluster_name,
            service_group: raw.service_group,
            template_group: raw.template_group,
            desired_count,
            task_count: None,
            target_lambda_arn: None,
            minimum_healthy_percent: raw.minimum_healthy_percent.unwrap_or(50),
            maximum_percent: raw.maximum_percent.unwrap_or(200),
            distinct_instance: raw.distinct_instance.unwrap_or(false),
        })
    }

    /// Parses a scheduled task's environment list. Requires `ENVIRONMENT`,
    /// `CLUSTER_NAME`, `TASK_COUNT`, and `TARGET_LAMBDA_ARN`.
    pub fn from_scheduled_task_environment(entries: &[EnvironmentEntry]) -> Result<Self, ModelError> {
        let raw = RawFields::collect(entries);
        let environment = raw.environment.ok_or(ModelError::MissingEnvironmentValue("ENVIRONMENT"))?;
        let cluster_name = raw.cluster_name.ok_or(ModelError::MissingEnvironmentValue("CLUSTER_NAME"))?;
        let task_count = Some(raw.task_count.ok_or(ModelError::MissingEnvironmentValue("TASK_COUNT"))?);
        let target_lambda_arn = Some(
            raw.target_lambda_arn
                .ok_or(ModelError::MissingEnvironmentValue("TARGET_LAMBDA_ARN"))?,
        );

        Ok(TaskEnvironment {
            environment,
            cluster_name,
            service_group: raw.service_group,
            template_group: raw.template_group,
            desired_count: None,
            task_count,
            target_lambda_arn,
            minimum_healthy_percent: raw.minimum_healthy_percent.unwrap_or(50),
            maximum_percent: raw.maximum_percent.unwrap_or(200),
            distinct_instance: raw.distinct_instance.unwrap_or(false),
        })
    }
}

#[derive(Default)]
struct RawFields {
    environment: Option<String>,
    cluster_name: Option<String>,
    service_group: Option<String>,
    template_group: Option<String>,
    desired_count: Option<u32>,
    task_count: Option<u32>,
    target_lambda_arn: Option<String>,
    minimum_healthy_percent: Option<u32>,
    maximum_percent: Option<u32>,
    distinct_instance: Option<bool>,
}

impl RawFields {
    fn collect(entries: &[EnvironmentEntry]) -> Self {
        let mut raw = RawFields::default();
        for entry in entries {
            match entry.name.as_str() {
                "ENVIRONMENT" => raw.environment = Some(entry.value.clone()),
                "CLUSTER_NAME" => raw.cluster_name = Some(entry.value.clone()),
                "SERVICE_GROUP" => raw.service_group = Some(entry.value.clone()),
                "TEMPLATE_GROUP" => raw.template_group = Some(entry.value.clone()),
                "DESIRED_COUNT" => raw.desired_count = entry.value.parse().ok(),
                "TASK_COUNT" => raw.task_count = entry.value.parse().ok(),
                "TARGET_LAMBDA_ARN" => raw.target_lambda_arn = Some(entry.value.clone()),
                "MINIMUM_HEALTHY_PERCENT" => raw.minimum_healthy_percent = entry.value.parse().ok(),
                "MAXIMUM_PERCENT" => raw.maximum_percent = entry.value.parse().ok(),
                "DISTINCT_INSTANCE" => raw.distinct_instance = entry.value.parse().ok(),
                _ => {}
            }
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: &str) -> EnvironmentEntry {
        EnvironmentEntry {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn parses_required_service_keys_and_defaults() {
        let entries = vec![
            entry("ENVIRONMENT", "stg"),
            entry("CLUSTER_NAME", "main"),
            entry("DESIRED_COUNT", "2"),
        ];
        let env = TaskEnvironment::from_service_environment(&entries).unwrap();
        assert_eq!(env.environment, "stg");
        assert_eq!(env.cluster_name, "main");
        assert_eq!(env.desired_count, Some(2));
        assert_eq!(env.minimum_healthy_percent, 50);
        assert_eq!(env.maximum_percent, 200);
        assert!(!env.distinct_instance);
    }

    #[test]
    fn missing_required_service_key_fails() {
        let entries = vec![entry("ENVIRONMENT", "stg"), entry("CLUSTER_NAME", "main")];
        let err = TaskEnvironment::from_service_environment(&entries).unwrap_err();
        assert_eq!(err, ModelError::MissingEnvironmentValue("DESIRED_COUNT"));
    }

    #[test]
    fn parses_scheduled_task_keys() {
        let entries = vec![
            entry("ENVIRONMENT", "stg"),
            entry("CLUSTER_NAME", "main"),
            entry("TASK_COUNT", "1"),
            entry("TARGET_LAMBDA_ARN", "arn:aws:lambda:x"),
        ];
        let env = TaskEnvironment::from_scheduled_task_environment(&entries).unwrap();
        assert_eq!(env.task_count, Some(1));
        assert_eq!(env.target_lambda_arn.as_deref(), Some("arn:aws:lambda:x"));
    }
}
