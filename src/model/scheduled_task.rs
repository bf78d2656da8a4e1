use crate::model::diff::{diff_report, is_same_container_definitions};
use crate::model::service::PlacementStrategy;
use crate::model::task_definition::TaskDefinition;
use crate::model::task_environment::TaskEnvironment;
use crate::model::{Identified, RecordStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudwatchEventState {
    Enabled,
    Disabled,
}

/// Desired-state record for a Scheduled Task: a task definition plus a
/// cron/rate rule and a serverless target invoked on schedule.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub family: String,
    pub task_environment: TaskEnvironment,
    pub task_definition: TaskDefinition,
    pub schedule_expression: String,
    pub target_lambda_arn: String,
    pub placement_strategy: Vec<PlacementStrategy>,
    pub state: CloudwatchEventState,

    pub origin_task_definition: Option<TaskDefinition>,
    pub origin_task_definition_arn: Option<String>,
    pub task_exists: bool,
    pub task_definition_arn: Option<String>,
    pub is_same_task_definition: Option<bool>,
    pub status: RecordStatus,
}

impl ScheduledTask {
    pub fn new(
        family: String,
        task_environment: TaskEnvironment,
        task_definition: TaskDefinition,
        schedule_expression: String,
        target_lambda_arn: String,
        placement_strategy: Vec<PlacementStrategy>,
    ) -> Self {
        ScheduledTask {
            family,
            task_environment,
            task_definition,
            schedule_expression,
            target_lambda_arn,
            placement_strategy,
            state: CloudwatchEventState::Enabled,
            origin_task_definition: None,
            origin_task_definition_arn: None,
            task_exists: false,
            task_definition_arn: None,
            is_same_task_definition: None,
            status: RecordStatus::Normal,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.task_environment.cluster_name
    }

    pub fn check_deploy(&mut self) -> String {
        match &self.origin_task_definition {
            None => {
                self.is_same_task_definition = Some(false);
                "Scheduled task does not exist yet; it will be created".to_string()
            }
            Some(origin) => {
                let same = is_same_container_definitions(
                    &origin.container_definitions,
                    &self.task_definition.container_definitions,
                );
                self.is_same_task_definition = Some(same);
                if same {
                    self.task_definition_arn = self.origin_task_definition_arn.clone();
                }
                diff_report(&origin.container_definitions, &self.task_definition.container_definitions)
            }
        }
    }
}

impl Identified for ScheduledTask {
    fn family(&self) -> &str {
        &self.family
    }

    fn status(&self) -> RecordStatus {
        self.status
    }

    fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }
}
