use crate::cloud_api::CloudApi;
use crate::errors::CloudApiError;
use crate::model::observed::MANAGED_BY_MARKER;
use crate::model::task_definition::TaskDefinition;
use crate::model::{CloudwatchEventState, ObservedEventRule, ObservedService, Service, TaskEnvironment};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    services: HashMap<(String, String), ObservedService>,
    task_definitions_by_family: HashMap<String, Vec<TaskDefinition>>,
    rules: HashMap<String, ObservedEventRule>,
    running_tasks: HashMap<(String, String), Vec<String>>,
    calls: Vec<String>,
}

/// In-memory, scriptable `CloudApi` test double: every mutating call is logged for assertion and every describe
/// reflects exactly the state prior calls established. No waiting: services
/// are always reported stable immediately after create/update.
#[derive(Clone, Default)]
pub struct FakeCloudApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloudApi {
    pub fn new() -> Self {
        FakeCloudApi::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Seeds a live service as if a prior run had created it.
    pub fn seed_service(&self, cluster: &str, observed: ObservedService) {
        self.state
            .lock()
            .unwrap()
            .services
            .insert((cluster.to_string(), observed.service_name.clone()), observed);
    }

    pub fn seed_task_definition(&self, family: &str, task_definition: TaskDefinition) {
        self.state
            .lock()
            .unwrap()
            .task_definitions_by_family
            .entry(family.to_string())
            .or_default()
            .push(task_definition);
    }

    pub fn seed_rule(&self, rule: ObservedEventRule) {
        self.state.lock().unwrap().rules.insert(rule.name.clone(), rule);
    }

    fn log(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

impl CloudApi for FakeCloudApi {
    fn describe_cluster(&self, _name: &str) -> Result<(), CloudApiError> {
        Ok(())
    }

    fn list_clusters(&self) -> Result<Vec<String>, CloudApiError> {
        let state = self.state.lock().unwrap();
        Ok(state.services.keys().map(|(cluster, _)| cluster.clone()).collect::<std::collections::HashSet<_>>().into_iter().collect())
    }

    fn list_services(&self, cluster: &str) -> Result<Vec<String>, CloudApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .keys()
            .filter(|(c, _)| c == cluster)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn list_cloudwatch_rules(&self) -> Result<Vec<ObservedEventRule>, CloudApiError> {
        let state = self.state.lock().unwrap();
        Ok(state.rules.values().filter(|r| r.description == MANAGED_BY_MARKER).cloned().collect())
    }

    fn describe_services(&self, cluster: &str, names: &[String]) -> Result<Vec<ObservedService>, CloudApiError> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match state.services.get(&(cluster.to_string(), name.clone())) {
                Some(svc) => out.push(svc.clone()),
                None => missing.push(name.clone()),
            }
        }
        if out.is_empty() && !missing.is_empty() {
            return Err(CloudApiError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: missing.join(","),
                reason: "MISSING".to_string(),
            });
        }
        Ok(out)
    }

    fn describe_service(&self, cluster: &str, name: &str) -> Result<Option<ObservedService>, CloudApiError> {
        Ok(self.state.lock().unwrap().services.get(&(cluster.to_string(), name.to_string())).cloned())
    }

    fn describe_task_definition(&self, arn_or_family: &str) -> Result<Option<TaskDefinition>, CloudApiError> {
        let state = self.state.lock().unwrap();
        for revisions in state.task_definitions_by_family.values() {
            if let Some(td) = revisions.iter().find(|td| td.arn.as_deref() == Some(arn_or_family)) {
                return Ok(Some(td.clone()));
            }
        }
        Ok(state.task_definitions_by_family.get(arn_or_family).and_then(|revisions| revisions.last().cloned()))
    }

    fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<TaskDefinition, CloudApiError> {
        let mut state = self.state.lock().unwrap();
        let revisions = state.task_definitions_by_family.entry(task_definition.family.clone()).or_default();
        let revision = revisions.len() + 1;
        let mut registered = task_definition.clone();
        registered.arn = Some(format!("arn:aws:ecs:fake:task-definition/{}:{}", task_definition.family, revision));
        revisions.push(registered.clone());
        drop(state);
        self.log(format!("register_task_definition:{}", task_definition.family));
        Ok(registered)
    }

    fn deregister_task_definition(&self, arn: &str) -> Result<(), CloudApiError> {
        self.log(format!("deregister_task_definition:{arn}"));
        Ok(())
    }

    fn create_service(&self, cluster: &str, service: &Service, task_definition_arn: &str) -> Result<ObservedService, CloudApiError> {
        let desired_count = service.task_environment.desired_count.unwrap_or(0);
        let observed = ObservedService {
            cluster_name: cluster.to_string(),
            service_name: service.service_name(),
            status: "ACTIVE".to_string(),
            task_definition_arn: task_definition_arn.to_string(),
            running_count: desired_count,
            desired_count,
            task_environment: TaskEnvironment {
                desired_count: Some(desired_count),
                ..service.task_environment.clone()
            },
        };
        self.state
            .lock()
            .unwrap()
            .services
            .insert((cluster.to_string(), observed.service_name.clone()), observed.clone());
        self.log(format!("create_service:{}", observed.service_name));
        Ok(observed)
    }

    fn update_service(
        &self,
        cluster: &str,
        service_name: &str,
        desired_count: Option<u32>,
        task_definition_arn: &str,
    ) -> Result<ObservedService, CloudApiError> {
        let mut state = self.state.lock().unwrap();
        let key = (cluster.to_string(), service_name.to_string());
        let mut observed = state
            .services
            .get(&key)
            .cloned()
            .ok_or_else(|| CloudApiError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service_name.to_string(),
                reason: "not created yet".to_string(),
            })?;
        observed.task_definition_arn = task_definition_arn.to_string();
        if let Some(count) = desired_count {
            observed.desired_count = count;
            observed.running_count = count;
            observed.task_environment.desired_count = Some(count);
        }
        state.services.insert(key, observed.clone());
        drop(state);
        self.log(format!("update_service:{service_name}"));
        Ok(observed)
    }

    fn delete_service(&self, cluster: &str, service_name: &str) -> Result<(), CloudApiError> {
        self.state.lock().unwrap().services.remove(&(cluster.to_string(), service_name.to_string()));
        self.log(format!("delete_service:{service_name}"));
        Ok(())
    }

    fn wait_for_stable(&self, _cluster: &str, service_name: &str, _delay: Duration, _max_attempts: u32) -> Result<(), CloudApiError> {
        self.log(format!("wait_for_stable:{service_name}"));
        Ok(())
    }

    fn put_rule(&self, name: &str, schedule_expression: &str, enabled: bool) -> Result<String, CloudApiError> {
        let arn = format!("arn:aws:events:fake:rule/{name}");
        let mut state = self.state.lock().unwrap();
        let entry = state.rules.entry(name.to_string()).or_insert_with(|| ObservedEventRule {
            name: name.to_string(),
            arn: arn.clone(),
            description: MANAGED_BY_MARKER.to_string(),
            state: CloudwatchEventState::Enabled,
            schedule_expression: schedule_expression.to_string(),
            task_definition_arn: String::new(),
            family: name.to_string(),
            task_environment: TaskEnvironment {
                environment: String::new(),
                cluster_name: String::new(),
                service_group: None,
                template_group: None,
                desired_count: None,
                task_count: None,
                target_lambda_arn: None,
                minimum_healthy_percent: 50,
                maximum_percent: 200,
                distinct_instance: false,
            },
        });
        entry.schedule_expression = schedule_expression.to_string();
        entry.state = if enabled { CloudwatchEventState::Enabled } else { CloudwatchEventState::Disabled };
        drop(state);
        self.log(format!("put_rule:{name}"));
        Ok(arn)
    }

    fn put_targets(&self, rule_name: &str, _target_lambda_arn: &str, _input_json: &str) -> Result<(), CloudApiError> {
        self.log(format!("put_targets:{rule_name}"));
        Ok(())
    }

    fn delete_rule(&self, rule_name: &str) -> Result<(), CloudApiError> {
        self.state.lock().unwrap().rules.remove(rule_name);
        self.log(format!("delete_rule:{rule_name}"));
        Ok(())
    }

    fn remove_targets(&self, rule_name: &str) -> Result<(), CloudApiError> {
        self.log(format!("remove_targets:{rule_name}"));
        Ok(())
    }

    fn add_permission(&self, _function_arn: &str, _rule_arn: &str, statement_id: &str) -> Result<(), CloudApiError> {
        self.log(format!("add_permission:{statement_id}"));
        Ok(())
    }

    fn remove_permission(&self, _function_arn: &str, statement_id: &str) -> Result<(), CloudApiError> {
        self.log(format!("remove_permission:{statement_id}"));
        Ok(())
    }

    fn list_running_tasks(&self, cluster: &str, family: &str) -> Result<Vec<String>, CloudApiError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .running_tasks
            .get(&(cluster.to_string(), family.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn stop_task(&self, _cluster: &str, task_arn: &str) -> Result<(), CloudApiError> {
        self.log(format!("stop_task:{task_arn}"));
        Ok(())
    }

    fn wait_tasks_stopped(&self, _cluster: &str, _task_arns: &[String], _delay: Duration, _max_attempts: u32) -> Result<(), CloudApiError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task_definition::TaskDefinition;
    use serde_json::json;

    fn env() -> TaskEnvironment {
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

    fn td() -> TaskDefinition {
        TaskDefinition::from_rendered_json("api".into(), json!({"containerDefinitions": [{"name": "api"}]})).unwrap()
    }

    #[test]
    fn create_then_describe_round_trips() {
        let api = FakeCloudApi::new();
        let service = Service::new("api".into(), env(), td(), vec![], vec![], vec![], false, false);
        let created = api.create_service("main", &service, "arn:1").unwrap();
        assert_eq!(created.desired_count, 2);

        let described = api.describe_service("main", &service.service_name()).unwrap().unwrap();
        assert_eq!(described.running_count, 2);
        assert_eq!(api.call_count("create_service"), 1);
    }

    #[test]
    fn register_task_definition_increments_revision() {
        let api = FakeCloudApi::new();
        let first = api.register_task_definition(&td()).unwrap();
        let second = api.register_task_definition(&td()).unwrap();
        assert_ne!(first.arn, second.arn);
        assert_eq!(api.call_count("register_task_definition"), 2);
    }

    #[test]
    fn describe_services_fails_only_when_all_missing() {
        let api = FakeCloudApi::new();
        let err = api.describe_services("main", &["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, CloudApiError::ServiceNotFound { .. }));
    }
}
