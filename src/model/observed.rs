use crate::model::task_environment::TaskEnvironment;

/// Read-only snapshot of a live service, as returned by `describe_services`.
/// Joined against desired `Service` records by `(cluster, service_name)`.
#[derive(Debug, Clone)]
pub struct ObservedService {
    pub cluster_name: String,
    pub service_name: String,
    pub status: String,
    pub task_definition_arn: String,
    pub running_count: u32,
    pub desired_count: u32,
    pub task_environment: TaskEnvironment,
}

impl ObservedService {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }
}

/// Read-only snapshot of a live event rule, filtered to those carrying the
/// `"MANAGED BY TASK MANAGER"` ownership marker. Joined against desired
/// `ScheduledTask` records by `family`.
#[derive(Debug, Clone)]
pub struct ObservedEventRule {
    pub name: String,
    pub arn: String,
    pub description: String,
    pub state: super::scheduled_task::CloudwatchEventState,
    pub schedule_expression: String,
    pub task_definition_arn: String,
    pub family: String,
    pub task_environment: TaskEnvironment,
}

pub const MANAGED_BY_MARKER: &str = "MANAGED BY TASK MANAGER";

impl ObservedEventRule {
    pub fn is_managed(&self) -> bool {
        self.description == MANAGED_BY_MARKER
    }
}
