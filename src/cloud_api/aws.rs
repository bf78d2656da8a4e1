use crate::cloud_api::retry::{retry_with_policy, RetryClass, RetryPolicy};
use crate::cloud_api::CloudApi;
use crate::errors::CloudApiError;
use crate::model::observed::MANAGED_BY_MARKER;
use crate::model::task_definition::TaskDefinition;
use crate::model::{ObservedEventRule, ObservedService, Service};
use rusoto_core::{Region, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_ecs::{
    ContainerDefinition, CreateServiceRequest, DeleteServiceRequest, DeregisterTaskDefinitionRequest, DescribeServicesRequest,
    DescribeTaskDefinitionRequest, Ecs, EcsClient, ListClustersRequest, ListServicesRequest, ListTasksRequest, RegisterTaskDefinitionRequest,
    StopTaskRequest, UpdateServiceRequest,
};
use rusoto_events::{
    AddPermissionRequest as EventsAddPermissionRequest, CloudWatchEvents, CloudWatchEventsClient, DeleteRuleRequest, ListRulesRequest,
    PutRuleRequest, PutTargetsRequest, RemoveTargetsRequest, Target as EventTarget,
};
use rusoto_lambda::{AddPermissionRequest, Lambda, LambdaClient, RemovePermissionRequest};
use serde_json::{Map, Value};
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Batch size the control plane documents for `describe_services`.
const DESCRIBE_BATCH_SIZE: usize = 10;

/// AWS-flavored `CloudApi`: ECS for clusters/services/task definitions,
/// CloudWatch Events for rules/targets, Lambda for permission grants on the
/// serverless target. All three SDK clients share one region and credentials
/// provider, constructed once per worker.
pub struct AwsCloudApi {
    ecs: EcsClient,
    events: CloudWatchEventsClient,
    lambda: LambdaClient,
    runtime: Runtime,
}

impl AwsCloudApi {
    pub fn new(region: Region, key: &str, secret: &str) -> Result<Self, CloudApiError> {
        let provider = StaticProvider::new_minimal(key.to_string(), secret.to_string());
        let http = rusoto_core::HttpClient::new().map_err(|e| CloudApiError::Transport(e.to_string()))?;

        Ok(AwsCloudApi {
            ecs: EcsClient::new_with(http.clone(), provider.clone(), region.clone()),
            events: CloudWatchEventsClient::new_with(http.clone(), provider.clone(), region.clone()),
            lambda: LambdaClient::new_with(http, provider, region),
            runtime: Runtime::new().map_err(|e| CloudApiError::Transport(e.to_string()))?,
        })
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

fn transport_error<E: std::fmt::Display>(err: RusotoError<E>) -> CloudApiError {
    CloudApiError::Transport(err.to_string())
}

fn is_throttling<E: std::fmt::Display>(err: &RusotoError<E>) -> bool {
    matches!(err, RusotoError::Service(_)) && err.to_string().to_lowercase().contains("throttl")
}

fn container_definitions_to_rusoto(containers: &[Map<String, Value>]) -> Result<Vec<ContainerDefinition>, CloudApiError> {
    containers
        .iter()
        .map(|c| serde_json::from_value(Value::Object(c.clone())).map_err(|e| CloudApiError::Transport(e.to_string())))
        .collect()
}

fn container_definitions_from_rusoto(containers: &[ContainerDefinition]) -> Vec<Map<String, Value>> {
    containers
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok().and_then(|v| v.as_object().cloned()))
        .collect()
}

impl CloudApi for AwsCloudApi {
    fn describe_cluster(&self, name: &str) -> Result<(), CloudApiError> {
        let request = rusoto_ecs::DescribeClustersRequest {
            clusters: Some(vec![name.to_string()]),
            include: None,
        };
        let response = self
            .block_on(self.ecs.describe_clusters(request))
            .map_err(transport_error)?;
        if !response.failures.unwrap_or_default().is_empty() {
            return Err(CloudApiError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn list_clusters(&self) -> Result<Vec<String>, CloudApiError> {
        let mut arns = Vec::new();
        let mut next_token = None;
        loop {
            let request = ListClustersRequest {
                max_results: Some(100),
                next_token: next_token.clone(),
            };
            let response = self.block_on(self.ecs.list_clusters(request)).map_err(transport_error)?;
            arns.extend(response.cluster_arns.unwrap_or_default());
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(arns)
    }

    fn list_services(&self, cluster: &str) -> Result<Vec<String>, CloudApiError> {
        let mut arns = Vec::new();
        let mut next_token = None;
        loop {
            let request = ListServicesRequest {
                cluster: Some(cluster.to_string()),
                max_results: Some(100),
                next_token: next_token.clone(),
                launch_type: None,
                scheduling_strategy: None,
            };
            let response = self.block_on(self.ecs.list_services(request)).map_err(transport_error)?;
            arns.extend(response.service_arns.unwrap_or_default());
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(arns)
    }

    fn list_cloudwatch_rules(&self) -> Result<Vec<ObservedEventRule>, CloudApiError> {
        let mut out = Vec::new();
        let mut next_token = None;
        loop {
            let request = ListRulesRequest {
                name_prefix: None,
                next_token: next_token.clone(),
                limit: Some(100),
                event_bus_name: None,
            };
            let response = self.block_on(self.events.list_rules(request)).map_err(transport_error)?;
            for rule in response.rules.unwrap_or_default() {
                let description = rule.description.clone().unwrap_or_default();
                if description != MANAGED_BY_MARKER {
                    continue;
                }
                let name = rule.name.clone().unwrap_or_default();
                let targets = self
                    .block_on(self.events.list_targets_by_rule(rusoto_events::ListTargetsByRuleRequest {
                        rule: name.clone(),
                        event_bus_name: None,
                        next_token: None,
                        limit: None,
                    }))
                    .map_err(transport_error)?;
                let target_lambda_arn = targets
                    .targets
                    .unwrap_or_default()
                    .first()
                    .map(|t| t.arn.clone())
                    .unwrap_or_default();

                out.push(ObservedEventRule {
                    name: name.clone(),
                    arn: rule.arn.clone().unwrap_or_default(),
                    description,
                    state: match rule.state.as_deref() {
                        Some("DISABLED") => crate::model::CloudwatchEventState::Disabled,
                        _ => crate::model::CloudwatchEventState::Enabled,
                    },
                    schedule_expression: rule.schedule_expression.clone().unwrap_or_default(),
                    task_definition_arn: String::new(),
                    family: name.rsplit_once('-').map(|(_, fam)| fam.to_string()).unwrap_or(name),
                    task_environment: crate::model::TaskEnvironment {
                        environment: String::new(),
                        cluster_name: String::new(),
                        service_group: None,
                        template_group: None,
                        desired_count: None,
                        task_count: None,
                        target_lambda_arn: Some(target_lambda_arn),
                        minimum_healthy_percent: 50,
                        maximum_percent: 200,
                        distinct_instance: false,
                    },
                });
            }
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    fn describe_services(&self, cluster: &str, names: &[String]) -> Result<Vec<ObservedService>, CloudApiError> {
        let mut observed = Vec::new();
        let mut last_err = None;

        for batch in names.chunks(DESCRIBE_BATCH_SIZE) {
            let request = DescribeServicesRequest {
                cluster: Some(cluster.to_string()),
                services: batch.to_vec(),
                include: None,
            };
            let result = retry_with_policy(
                || {
                    self.block_on(self.ecs.describe_services(request.clone()))
                        .map_err(transport_error)
                },
                |e| if matches!(e, CloudApiError::Transport(_)) { RetryClass::Retry } else { RetryClass::Fatal },
                RetryPolicy::new(6),
            );

            match result {
                Ok(response) => {
                    for failure in response.failures.unwrap_or_default() {
                        last_err = Some(CloudApiError::ServiceNotFound {
                            cluster: cluster.to_string(),
                            service: failure.arn.unwrap_or_default(),
                            reason: failure.reason.unwrap_or_default(),
                        });
                    }
                    for service in response.services.unwrap_or_default() {
                        if let Some(obs) = to_observed_service(cluster, &service) {
                            observed.push(obs);
                        }
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        if observed.is_empty() {
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        Ok(observed)
    }

    fn describe_service(&self, cluster: &str, name: &str) -> Result<Option<ObservedService>, CloudApiError> {
        let all = self.describe_services(cluster, std::slice::from_ref(&name.to_string()))?;
        Ok(all
            .into_iter()
            .find(|s| s.status == "ACTIVE")
            .or_else(|| self.describe_services(cluster, std::slice::from_ref(&name.to_string())).ok().and_then(|v| v.into_iter().next())))
    }

    fn describe_task_definition(&self, arn_or_family: &str) -> Result<Option<TaskDefinition>, CloudApiError> {
        let request = DescribeTaskDefinitionRequest {
            task_definition: arn_or_family.to_string(),
            include: None,
        };
        match self.block_on(self.ecs.describe_task_definition(request)) {
            Ok(response) => {
                let td = response.task_definition.ok_or_else(|| CloudApiError::NotFound(arn_or_family.to_string()))?;
                let family = td.family.clone().unwrap_or_default();
                let arn = td.task_definition_arn.clone();
                let containers = container_definitions_from_rusoto(&td.container_definitions.unwrap_or_default());
                Ok(Some(TaskDefinition {
                    family,
                    container_definitions: containers,
                    arn,
                }))
            }
            Err(RusotoError::Service(_)) => Ok(None),
            Err(e) => Err(transport_error(e)),
        }
    }

    fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<TaskDefinition, CloudApiError> {
        let containers = container_definitions_to_rusoto(&task_definition.container_definitions)?;
        let request = RegisterTaskDefinitionRequest {
            family: task_definition.family.clone(),
            container_definitions: containers,
            ..Default::default()
        };

        let response = retry_with_policy(
            || self.block_on(self.ecs.register_task_definition(request.clone())).map_err(transport_error),
            classify_throttle,
            RetryPolicy::new(6),
        )?;

        let td = response.task_definition.ok_or_else(|| CloudApiError::Transport("empty register response".to_string()))?;
        Ok(TaskDefinition {
            family: td.family.unwrap_or_else(|| task_definition.family.clone()),
            container_definitions: task_definition.container_definitions.clone(),
            arn: td.task_definition_arn,
        })
    }

    fn deregister_task_definition(&self, arn: &str) -> Result<(), CloudApiError> {
        let request = DeregisterTaskDefinitionRequest {
            task_definition: arn.to_string(),
        };
        retry_with_policy(
            || self.block_on(self.ecs.deregister_task_definition(request.clone())).map(|_| ()).map_err(transport_error),
            classify_throttle,
            RetryPolicy::new(3),
        )
    }

    fn create_service(&self, cluster: &str, service: &Service, task_definition_arn: &str) -> Result<ObservedService, CloudApiError> {
        let desired_count = service.task_environment.desired_count.unwrap_or(0);
        let request = CreateServiceRequest {
            cluster: Some(cluster.to_string()),
            service_name: service.service_name(),
            task_definition: Some(task_definition_arn.to_string()),
            desired_count: Some(desired_count as i64),
            placement_constraints: as_rusoto_list(&service.placement_constraints),
            placement_strategy: as_rusoto_list(&service.placement_strategy),
            load_balancers: as_rusoto_list(&service.load_balancers),
            ..Default::default()
        };

        let response = retry_with_policy(
            || self.block_on(self.ecs.create_service(request.clone())).map_err(transport_error),
            classify_throttle,
            RetryPolicy::new(5),
        )?;

        let svc = response
            .service
            .ok_or_else(|| CloudApiError::Transport("empty create_service response".to_string()))?;
        to_observed_service(cluster, &svc).ok_or_else(|| CloudApiError::Transport("malformed create_service response".to_string()))
    }

    fn update_service(
        &self,
        cluster: &str,
        service_name: &str,
        desired_count: Option<u32>,
        task_definition_arn: &str,
    ) -> Result<ObservedService, CloudApiError> {
        let request = UpdateServiceRequest {
            cluster: Some(cluster.to_string()),
            service: service_name.to_string(),
            task_definition: Some(task_definition_arn.to_string()),
            desired_count: desired_count.map(|v| v as i64),
            force_new_deployment: Some(true),
            ..Default::default()
        };

        let response = retry_with_policy(
            || self.block_on(self.ecs.update_service(request.clone())).map_err(transport_error),
            classify_throttle,
            RetryPolicy::new(5),
        )?;

        let svc = response
            .service
            .ok_or_else(|| CloudApiError::Transport("empty update_service response".to_string()))?;
        to_observed_service(cluster, &svc).ok_or_else(|| CloudApiError::Transport("malformed update_service response".to_string()))
    }

    fn delete_service(&self, cluster: &str, service_name: &str) -> Result<(), CloudApiError> {
        let request = DeleteServiceRequest {
            cluster: Some(cluster.to_string()),
            service: service_name.to_string(),
            force: Some(true),
        };
        self.block_on(self.ecs.delete_service(request)).map(|_| ()).map_err(transport_error)
    }

    fn wait_for_stable(&self, cluster: &str, service_name: &str, delay: Duration, max_attempts: u32) -> Result<(), CloudApiError> {
        for attempt in 0..max_attempts {
            let observed = self.describe_service(cluster, service_name)?;
            if let Some(svc) = observed {
                if svc.running_count == svc.desired_count {
                    return Ok(());
                }
            }
            if attempt + 1 < max_attempts {
                thread::sleep(delay);
            }
        }
        Err(CloudApiError::WaiterTimeout {
            cluster: cluster.to_string(),
            service: service_name.to_string(),
            attempts: max_attempts,
        })
    }

    fn put_rule(&self, name: &str, schedule_expression: &str, enabled: bool) -> Result<String, CloudApiError> {
        let request = PutRuleRequest {
            name: name.to_string(),
            schedule_expression: Some(schedule_expression.to_string()),
            description: Some(MANAGED_BY_MARKER.to_string()),
            state: Some(if enabled { "ENABLED".to_string() } else { "DISABLED".to_string() }),
            ..Default::default()
        };
        let response = self.block_on(self.events.put_rule(request)).map_err(transport_error)?;
        Ok(response.rule_arn.unwrap_or_default())
    }

    fn put_targets(&self, rule_name: &str, target_lambda_arn: &str, input_json: &str) -> Result<(), CloudApiError> {
        let target = EventTarget {
            id: rule_name.to_string(),
            arn: target_lambda_arn.to_string(),
            input: Some(input_json.to_string()),
            ..Default::default()
        };
        let request = PutTargetsRequest {
            rule: rule_name.to_string(),
            targets: vec![target],
            event_bus_name: None,
        };
        let response = self.block_on(self.events.put_targets(request)).map_err(transport_error)?;
        if response.failed_entry_count.unwrap_or(0) > 0 {
            return Err(CloudApiError::Transport(format!("put_targets failed for rule {rule_name}")));
        }
        Ok(())
    }

    fn delete_rule(&self, rule_name: &str) -> Result<(), CloudApiError> {
        let request = DeleteRuleRequest {
            name: rule_name.to_string(),
            force: Some(true),
            event_bus_name: None,
        };
        self.block_on(self.events.delete_rule(request)).map(|_| ()).map_err(transport_error)
    }

    fn remove_targets(&self, rule_name: &str) -> Result<(), CloudApiError> {
        let request = RemoveTargetsRequest {
            rule: rule_name.to_string(),
            ids: vec![rule_name.to_string()],
            force: Some(true),
            event_bus_name: None,
        };
        self.block_on(self.events.remove_targets(request)).map(|_| ()).map_err(transport_error)
    }

    fn add_permission(&self, function_arn: &str, rule_arn: &str, statement_id: &str) -> Result<(), CloudApiError> {
        let request = AddPermissionRequest {
            function_name: function_arn.to_string(),
            statement_id: statement_id.to_string(),
            action: "lambda:InvokeFunction".to_string(),
            principal: "events.amazonaws.com".to_string(),
            source_arn: Some(rule_arn.to_string()),
            ..Default::default()
        };
        match self.block_on(self.lambda.add_permission(request)) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("ResourceConflict") => Ok(()),
            Err(e) => Err(transport_error(e)),
        }
    }

    fn remove_permission(&self, function_arn: &str, statement_id: &str) -> Result<(), CloudApiError> {
        let request = RemovePermissionRequest {
            function_name: function_arn.to_string(),
            statement_id: statement_id.to_string(),
            ..Default::default()
        };
        match self.block_on(self.lambda.remove_permission(request)) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("ResourceNotFound") => Ok(()),
            Err(e) => Err(transport_error(e)),
        }
    }

    fn list_running_tasks(&self, cluster: &str, family: &str) -> Result<Vec<String>, CloudApiError> {
        let mut arns = Vec::new();
        let mut next_token = None;
        loop {
            let request = ListTasksRequest {
                cluster: Some(cluster.to_string()),
                family: Some(family.to_string()),
                desired_status: Some("RUNNING".to_string()),
                next_token: next_token.clone(),
                ..Default::default()
            };
            let response = self.block_on(self.ecs.list_tasks(request)).map_err(transport_error)?;
            arns.extend(response.task_arns.unwrap_or_default());
            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(arns)
    }

    fn stop_task(&self, cluster: &str, task_arn: &str) -> Result<(), CloudApiError> {
        let request = StopTaskRequest {
            cluster: Some(cluster.to_string()),
            task: task_arn.to_string(),
            reason: Some("stopped by fleet-orchestrator".to_string()),
        };
        self.block_on(self.ecs.stop_task(request)).map(|_| ()).map_err(transport_error)
    }

    fn wait_tasks_stopped(&self, cluster: &str, task_arns: &[String], delay: Duration, max_attempts: u32) -> Result<(), CloudApiError> {
        if task_arns.is_empty() {
            return Ok(());
        }
        for attempt in 0..max_attempts {
            let request = rusoto_ecs::DescribeTasksRequest {
                cluster: Some(cluster.to_string()),
                tasks: task_arns.to_vec(),
                include: None,
            };
            let response = self.block_on(self.ecs.describe_tasks(request)).map_err(transport_error)?;
            let all_stopped = response
                .tasks
                .unwrap_or_default()
                .iter()
                .all(|t| t.last_status.as_deref() == Some("STOPPED"));
            if all_stopped {
                return Ok(());
            }
            if attempt + 1 < max_attempts {
                thread::sleep(delay);
            }
        }
        Err(CloudApiError::WaiterTimeout {
            cluster: cluster.to_string(),
            service: task_arns.join(","),
            attempts: max_attempts,
        })
    }
}

fn classify_throttle(err: &CloudApiError) -> RetryClass {
    match err {
        CloudApiError::Transport(msg) if msg.to_lowercase().contains("throttl") => RetryClass::Retry,
        _ => RetryClass::Fatal,
    }
}

fn as_rusoto_list<T: serde::de::DeserializeOwned>(values: &[Value]) -> Option<Vec<T>> {
    if values.is_empty() {
        return None;
    }
    values.iter().cloned().map(serde_json::from_value).collect::<Result<Vec<T>, _>>().ok()
}

fn to_observed_service(cluster: &str, service: &rusoto_ecs::Service) -> Option<ObservedService> {
    Some(ObservedService {
        cluster_name: cluster.to_string(),
        service_name: service.service_name.clone()?,
        status: service.status.clone().unwrap_or_default(),
        task_definition_arn: service.task_definition.clone().unwrap_or_default(),
        running_count: service.running_count.unwrap_or(0) as u32,
        desired_count: service.desired_count.unwrap_or(0) as u32,
        task_environment: crate::model::TaskEnvironment {
            environment: String::new(),
            cluster_name: cluster.to_string(),
            service_group: None,
            template_group: None,
            desired_count: service.desired_count.map(|v| v as u32),
            task_count: None,
            target_lambda_arn: None,
            minimum_healthy_percent: 50,
            maximum_percent: 200,
            distinct_instance: false,
        },
    })
}
