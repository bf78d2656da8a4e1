pub mod aws;
pub mod fake;
pub mod retry;

use crate::errors::CloudApiError;
use crate::model::task_definition::TaskDefinition;
use crate::model::{ObservedEventRule, ObservedService, Service};
use std::time::Duration;

/// Thin capability interface over the control plane. One instance is
/// constructed per worker — implementations must not assume thread-safety of
/// the underlying SDK client across workers.
///
/// Rate-limit handling is a contract of implementations, not of callers:
/// every write or describe that may throttle retries internally via
/// [`retry::retry_with_policy`] and never surfaces `CloudApiError::Throttled`
/// to a caller that waited out the retry budget — only `WaiterTimeout` and
/// genuine transport failures cross this boundary.
pub trait CloudApi: Send {
    fn describe_cluster(&self, name: &str) -> Result<(), CloudApiError>;
    fn list_clusters(&self) -> Result<Vec<String>, CloudApiError>;
    fn list_services(&self, cluster: &str) -> Result<Vec<String>, CloudApiError>;
    fn list_cloudwatch_rules(&self) -> Result<Vec<ObservedEventRule>, CloudApiError>;

    /// Batches in groups of 10; accumulates results and per-batch failures,
    /// raising only if the final accumulated list is empty.
    fn describe_services(&self, cluster: &str, names: &[String]) -> Result<Vec<ObservedService>, CloudApiError>;
    fn describe_service(&self, cluster: &str, name: &str) -> Result<Option<ObservedService>, CloudApiError>;

    fn describe_task_definition(&self, arn_or_family: &str) -> Result<Option<TaskDefinition>, CloudApiError>;
    fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<TaskDefinition, CloudApiError>;
    fn deregister_task_definition(&self, arn: &str) -> Result<(), CloudApiError>;

    fn create_service(&self, cluster: &str, service: &Service, task_definition_arn: &str) -> Result<ObservedService, CloudApiError>;
    fn update_service(
        &self,
        cluster: &str,
        service_name: &str,
        desired_count: Option<u32>,
        task_definition_arn: &str,
    ) -> Result<ObservedService, CloudApiError>;
    fn delete_service(&self, cluster: &str, service_name: &str) -> Result<(), CloudApiError>;

    /// Blocks until deployments report steady or raises `WaiterTimeout`.
    fn wait_for_stable(&self, cluster: &str, service_name: &str, delay: Duration, max_attempts: u32) -> Result<(), CloudApiError>;

    fn put_rule(&self, name: &str, schedule_expression: &str, enabled: bool) -> Result<String, CloudApiError>;
    fn put_targets(&self, rule_name: &str, target_lambda_arn: &str, input_json: &str) -> Result<(), CloudApiError>;
    fn delete_rule(&self, rule_name: &str) -> Result<(), CloudApiError>;
    fn remove_targets(&self, rule_name: &str) -> Result<(), CloudApiError>;
    /// Idempotent: swallows `ResourceConflict`.
    fn add_permission(&self, function_arn: &str, rule_arn: &str, statement_id: &str) -> Result<(), CloudApiError>;
    fn remove_permission(&self, function_arn: &str, statement_id: &str) -> Result<(), CloudApiError>;

    fn list_running_tasks(&self, cluster: &str, family: &str) -> Result<Vec<String>, CloudApiError>;
    fn stop_task(&self, cluster: &str, task_arn: &str) -> Result<(), CloudApiError>;
    fn wait_tasks_stopped(&self, cluster: &str, task_arns: &[String], delay: Duration, max_attempts: u32) -> Result<(), CloudApiError>;
}
