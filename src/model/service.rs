use crate::model::diff::{diff_report, is_same_container_definitions};
use crate::model::task_definition::TaskDefinition;
use crate::model::task_environment::TaskEnvironment;
use crate::model::{Identified, RecordStatus};

/// Placement constraint / strategy passthrough fields: opaque to this tool,
/// forwarded verbatim to the control plane on create/update.
pub type PlacementStrategy = serde_json::Value;
pub type PlacementConstraint = serde_json::Value;
pub type LoadBalancer = serde_json::Value;

/// Desired-state record for a long-running Service.
#[derive(Debug, Clone)]
pub struct Service {
    pub family: String,
    pub task_environment: TaskEnvironment,
    pub task_definition: TaskDefinition,
    pub placement_strategy: Vec<PlacementStrategy>,
    pub placement_constraints: Vec<PlacementConstraint>,
    pub load_balancers: Vec<LoadBalancer>,
    pub stop_before_deploy: bool,
    pub is_primary_placement: bool,

    // Populated by fetch / check-deploy / deploy / wait-stable:
    pub origin_task_definition: Option<TaskDefinition>,
    pub origin_task_definition_arn: Option<String>,
    pub origin_service_exists: bool,
    pub origin_desired_count: Option<u32>,
    pub running_count: Option<u32>,
    pub desired_count: Option<u32>,
    pub task_definition_arn: Option<String>,
    pub is_same_task_definition: Option<bool>,
    pub status: RecordStatus,
}

impl Service {
    pub fn new(
        family: String,
        task_environment: TaskEnvironment,
        task_definition: TaskDefinition,
        placement_strategy: Vec<PlacementStrategy>,
        placement_constraints: Vec<PlacementConstraint>,
        load_balancers: Vec<LoadBalancer>,
        stop_before_deploy: bool,
        is_primary_placement: bool,
    ) -> Self {
        Service {
            family,
            task_environment,
            task_definition,
            placement_strategy,
            placement_constraints,
            load_balancers,
            stop_before_deploy,
            is_primary_placement,
            origin_task_definition: None,
            origin_task_definition_arn: None,
            origin_service_exists: false,
            origin_desired_count: None,
            running_count: None,
            desired_count: None,
            task_definition_arn: None,
            is_same_task_definition: None,
            status: RecordStatus::Normal,
        }
    }

    pub fn service_name(&self) -> String {
        format!("{}-service", self.family)
    }

    pub fn cluster_name(&self) -> &str {
        &self.task_environment.cluster_name
    }

    /// Runs the container-definition diff against the currently-fetched
    /// origin task definition and records `is_same_task_definition`.
    /// Returns the human-readable check-deploy report.
    pub fn check_deploy(&mut self) -> String {
        match &self.origin_task_definition {
            None => {
                self.is_same_task_definition = Some(false);
                "Service does not exist yet; it will be created".to_string()
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

    /// True once `stop_before_deploy` is set and there is a non-zero origin
    /// desired count to scale down from.
    pub fn needs_stop_before_deploy(&self) -> bool {
        self.stop_before_deploy && self.origin_desired_count.unwrap_or(0) > 0
    }
}

impl Identified for Service {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_env() -> TaskEnvironment {
        TaskEnvironment {
            environment: "stg".into(),
            cluster_name: "main".into(),
            service_group: None,
            template_group: None,
            desired_count: Some(2),
            task_count: None,
            target_lambda_arn: None,
            minimum_healthy_percent: 50,
            maximum_percent: 200,
            distinct_instance: false,
        }
    }

    fn td(image: &str) -> TaskDefinition {
        TaskDefinition::from_rendered_json(
            "api".into(),
            json!({"containerDefinitions": [{"name": "api", "image": image}]}),
        )
        .unwrap()
    }

    #[test]
    fn service_name_is_family_plus_suffix() {
        let service = Service::new("api".into(), task_env(), td("app:v1"), vec![], vec![], vec![], false, false);
        assert_eq!(service.service_name(), "api-service");
    }

    #[test]
    fn check_deploy_reports_unchanged_when_identical() {
        let mut service = Service::new("api".into(), task_env(), td("app:v1"), vec![], vec![], vec![], false, false);
        service.origin_task_definition = Some(td("app:v1"));
        service.origin_task_definition_arn = Some("arn:1".into());
        let report = service.check_deploy();
        assert_eq!(service.is_same_task_definition, Some(true));
        assert_eq!(service.task_definition_arn, Some("arn:1".into()));
        assert_eq!(report, "Container Definition is not changed");
    }

    #[test]
    fn check_deploy_reports_changed_when_different() {
        let mut service = Service::new("api".into(), task_env(), td("app:v2"), vec![], vec![], vec![], false, false);
        service.origin_task_definition = Some(td("app:v1"));
        service.origin_task_definition_arn = Some("arn:1".into());
        service.check_deploy();
        assert_eq!(service.is_same_task_definition, Some(false));
        assert_eq!(service.task_definition_arn, None);
    }

    #[test]
    fn needs_stop_before_deploy_requires_both_flag_and_running_origin() {
        let mut service = Service::new("api".into(), task_env(), td("app:v1"), vec![], vec![], vec![], true, false);
        assert!(!service.needs_stop_before_deploy());
        service.origin_desired_count = Some(3);
        assert!(service.needs_stop_before_deploy());
    }
}
