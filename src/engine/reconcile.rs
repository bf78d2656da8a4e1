use crate::engine::worker_pool::{parallel_for_each, run_phase};
use crate::engine::JobMode;
use crate::errors::OrchestratorError;
use crate::phase_banner;
use crate::model::{CloudwatchEventState, ObservedEventRule, ObservedService, RecordStatus, ScheduledTask, Service};
use crate::cloud_api::CloudApi;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tunable knobs threaded from CLI flags into the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub threads_count: usize,
    pub service_wait_delay: Duration,
    pub service_wait_max_attempts: u32,
    pub service_zero_keep: bool,
    pub stop_before_deploy_enabled: bool,
    pub delete_unused_service: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            threads_count: 5,
            service_wait_delay: Duration::from_secs(10),
            service_wait_max_attempts: 30,
            service_zero_keep: false,
            stop_before_deploy_enabled: true,
            delete_unused_service: true,
        }
    }
}

/// One record's final status, surfaced to the orchestrator for exit-code
/// mapping.
pub struct ReportRecord {
    pub family: String,
    pub status: RecordStatus,
}

pub struct RunReport {
    pub services: Vec<ReportRecord>,
    pub scheduled_tasks: Vec<ReportRecord>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.services.iter().chain(self.scheduled_tasks.iter()).all(|r| r.status == RecordStatus::Normal)
    }
}

#[derive(Default)]
struct Buckets {
    primary_stop_before: Vec<Arc<Mutex<Service>>>,
    stop_before: Vec<Arc<Mutex<Service>>>,
    primary_deploy: Vec<Arc<Mutex<Service>>>,
    remain_deploy: Vec<Arc<Mutex<Service>>>,
}

/// The reconciliation engine: drives the desired-state universe through an
/// ordered, phased pipeline, each phase a bulk worker-pool drain via
/// [`run_phase`]/[`parallel_for_each`] before the next phase begins.
pub struct Engine<CF> {
    config: EngineConfig,
    make_cloud_api: CF,
}

impl<CF> Engine<CF>
where
    CF: Fn() -> Box<dyn CloudApi> + Sync,
{
    pub fn new(config: EngineConfig, make_cloud_api: CF) -> Self {
        Engine { config, make_cloud_api }
    }

    fn worker_count(&self, size: usize) -> usize {
        self.config.threads_count.min(size.max(1))
    }

    /// Full `run` mode pipeline: fetch through report, in order.
    pub fn run(&self, services: Vec<Service>, scheduled_tasks: Vec<ScheduledTask>) -> Result<RunReport, OrchestratorError> {
        let services: Vec<Arc<Mutex<Service>>> = services.into_iter().map(|s| Arc::new(Mutex::new(s))).collect();
        let scheduled_tasks: Vec<Arc<Mutex<ScheduledTask>>> = scheduled_tasks.into_iter().map(|t| Arc::new(Mutex::new(t))).collect();

        phase_banner!("fetch");
        let clusters = self.discover_clusters(&services, &scheduled_tasks)?;
        let (observed_services, observed_rules) = self.fetch(&clusters)?;

        phase_banner!("classify");
        let (delete_services, delete_rules) = self.classify(&services, observed_services, &scheduled_tasks, observed_rules);

        phase_banner!("delete-unused");
        if self.config.delete_unused_service {
            self.delete_unused_services(&delete_services);
            self.delete_unused_scheduled_tasks(&delete_rules);
        } else {
            for svc in &delete_services {
                warn!(service = svc.service_name.as_str(), "unused service not deleted (--no-delete-unused-service)");
            }
            for rule in &delete_rules {
                warn!(rule = rule.name.as_str(), "unused scheduled task rule not deleted (--no-delete-unused-service)");
            }
        }

        phase_banner!("check-deploy");
        self.check_deploy_services(&services);
        self.check_deploy_scheduled_tasks(&scheduled_tasks);

        let buckets = self.partition(&services);

        phase_banner!("stop-scheduled-tasks");
        self.stop_scheduled_tasks(&scheduled_tasks);

        phase_banner!("stop-before-deploy");
        self.stop_before_deploy_phase(&buckets.primary_stop_before, &buckets.stop_before);

        phase_banner!("deploy");
        self.deploy_services(&buckets.primary_deploy, &buckets.remain_deploy, &buckets.primary_stop_before, &buckets.stop_before);

        phase_banner!("start-after-deploy");
        self.start_after_deploy(&buckets.primary_stop_before, &buckets.stop_before);

        phase_banner!("deploy-scheduled-tasks");
        self.deploy_scheduled_tasks(&scheduled_tasks);

        Ok(self.report(&services, &scheduled_tasks))
    }

    /// `service --dry-run`: fetch -> classify -> check-delete (log only) ->
    /// check-deploy (log diffs). No mutating calls issued at all.
    pub fn dry_run(&self, services: Vec<Service>, scheduled_tasks: Vec<ScheduledTask>) -> Result<RunReport, OrchestratorError> {
        let services: Vec<Arc<Mutex<Service>>> = services.into_iter().map(|s| Arc::new(Mutex::new(s))).collect();
        let scheduled_tasks: Vec<Arc<Mutex<ScheduledTask>>> = scheduled_tasks.into_iter().map(|t| Arc::new(Mutex::new(t))).collect();

        let clusters = self.discover_clusters(&services, &scheduled_tasks)?;
        let (observed_services, observed_rules) = self.fetch(&clusters)?;
        let (delete_services, delete_rules) = self.classify(&services, observed_services, &scheduled_tasks, observed_rules);

        for svc in &delete_services {
            info!(service = svc.service_name.as_str(), "dry-run: would delete unused service");
        }
        for rule in &delete_rules {
            info!(rule = rule.name.as_str(), "dry-run: would delete unused scheduled task rule");
        }

        self.check_deploy_services(&services);
        self.check_deploy_scheduled_tasks(&scheduled_tasks);

        Ok(self.report(&services, &scheduled_tasks))
    }

    /// Cluster set to fetch: every cluster a desired record references, plus
    /// every cluster actually live in the account — the latter is what lets
    /// delete-unused find ghosts in a cluster config no longer mentions at all.
    fn discover_clusters(&self, services: &[Arc<Mutex<Service>>], scheduled_tasks: &[Arc<Mutex<ScheduledTask>>]) -> Result<Vec<String>, OrchestratorError> {
        let mut set: HashSet<String> = services.iter().map(|s| s.lock().unwrap().cluster_name().to_string()).collect();
        set.extend(scheduled_tasks.iter().map(|t| t.lock().unwrap().cluster_name().to_string()));
        let api = (self.make_cloud_api)();
        set.extend(api.list_clusters()?);
        Ok(set.into_iter().collect())
    }

    /// Phase 1: list + batch-describe services per cluster, and list
    /// event rules filtered by the ownership marker. Per-cluster failures are
    /// logged and skipped rather than aborting the whole fetch, since a single
    /// unreachable cluster should not block reconciliation of the rest.
    fn fetch(&self, clusters: &[String]) -> Result<(Vec<ObservedService>, Vec<ObservedEventRule>), OrchestratorError> {
        let observed_services = Arc::new(Mutex::new(Vec::new()));

        parallel_for_each(clusters, self.worker_count(clusters.len()), &self.make_cloud_api, |cluster, api| {
            let names = match api.list_services(cluster) {
                Ok(names) => names,
                Err(err) => {
                    error!(cluster = cluster.as_str(), error = %err, "failed to list services");
                    return;
                }
            };
            if names.is_empty() {
                return;
            }
            match api.describe_services(cluster, &names) {
                Ok(services) => observed_services.lock().unwrap().extend(services),
                Err(err) => error!(cluster = cluster.as_str(), error = %err, "failed to describe services"),
            }
        });

        let api = (self.make_cloud_api)();
        let observed_rules = api.list_cloudwatch_rules()?;

        Ok((Arc::try_unwrap(observed_services).unwrap().into_inner().unwrap(), observed_rules))
    }

    /// Phase 2: bind observed records onto their desired counterpart
    /// by `(cluster, name)`/`family`, writing the fetched fields back into the
    /// desired record. Anything observed left unbound is "unused" and returned
    /// for the delete-unused phase.
    fn classify(
        &self,
        desired_services: &[Arc<Mutex<Service>>],
        observed_services: Vec<ObservedService>,
        desired_tasks: &[Arc<Mutex<ScheduledTask>>],
        observed_rules: Vec<ObservedEventRule>,
    ) -> (Vec<ObservedService>, Vec<ObservedEventRule>) {
        let mut observed_by_key: HashMap<(String, String), ObservedService> = observed_services
            .into_iter()
            .map(|o| ((o.cluster_name.clone(), o.service_name.clone()), o))
            .collect();

        for svc in desired_services {
            let mut svc = svc.lock().unwrap();
            let key = (svc.cluster_name().to_string(), svc.service_name());
            if let Some(observed) = observed_by_key.remove(&key) {
                svc.origin_service_exists = true;
                svc.origin_desired_count = Some(observed.desired_count);
                svc.running_count = Some(observed.running_count);
                svc.origin_task_definition_arn = Some(observed.task_definition_arn);
            } else {
                svc.origin_service_exists = false;
            }
        }
        let delete_services: Vec<ObservedService> = observed_by_key.into_values().collect();

        let mut rules_by_family: HashMap<String, ObservedEventRule> = observed_rules.into_iter().map(|r| (r.family.clone(), r)).collect();

        for task in desired_tasks {
            let mut task = task.lock().unwrap();
            if let Some(rule) = rules_by_family.remove(&task.family) {
                task.task_exists = true;
                task.origin_task_definition_arn = Some(rule.task_definition_arn);
                task.state = rule.state;
            } else {
                task.task_exists = false;
            }
        }
        let delete_scheduled_tasks: Vec<ObservedEventRule> = rules_by_family.into_values().collect();

        (delete_services, delete_scheduled_tasks)
    }

    /// Phase 3: scale to zero, wait stable, then delete. Deletion of
    /// ghosts is explicitly outside the exit-code contract, so failures
    /// here are logged and do not flip any record's status.
    fn delete_unused_services(&self, to_delete: &[ObservedService]) {
        parallel_for_each(to_delete, self.worker_count(to_delete.len()), &self.make_cloud_api, |observed, api| {
            if let Err(err) = api.update_service(&observed.cluster_name, &observed.service_name, Some(0), &observed.task_definition_arn) {
                error!(service = observed.service_name.as_str(), error = %err, "failed to scale down unused service");
                return;
            }
            if let Err(err) = api.wait_for_stable(
                &observed.cluster_name,
                &observed.service_name,
                self.config.service_wait_delay,
                self.config.service_wait_max_attempts,
            ) {
                error!(service = observed.service_name.as_str(), error = %err, "wait-stable failed while deleting unused service");
                return;
            }
            if let Err(err) = api.delete_service(&observed.cluster_name, &observed.service_name) {
                error!(service = observed.service_name.as_str(), error = %err, "failed to delete unused service");
            }
        });
    }

    fn delete_unused_scheduled_tasks(&self, to_delete: &[ObservedEventRule]) {
        parallel_for_each(to_delete, self.worker_count(to_delete.len()), &self.make_cloud_api, |rule, api| {
            let target_lambda_arn = rule.task_environment.target_lambda_arn.clone().unwrap_or_default();
            if let Err(err) = api.remove_permission(&target_lambda_arn, &format!("{}-invoke", rule.name)) {
                error!(rule = rule.name.as_str(), error = %err, "failed to remove permission for unused rule");
            }
            if let Err(err) = api.remove_targets(&rule.name) {
                error!(rule = rule.name.as_str(), error = %err, "failed to remove targets for unused rule");
            }
            if let Err(err) = api.delete_rule(&rule.name) {
                error!(rule = rule.name.as_str(), error = %err, "failed to delete unused rule");
            }
        });
    }

    /// Phase 4: resolve each desired record's origin task definition
    /// and run the container-definition diff. If a desired service wasn't
    /// bound during classify (a race with something just created), a direct
    /// describe is retried here before giving up on it.
    fn check_deploy_services(&self, services: &[Arc<Mutex<Service>>]) {
        run_phase(services, self.worker_count(services.len()), &self.make_cloud_api, |item, api| {
            let needs_recheck = !item.lock().unwrap().origin_service_exists;
            if needs_recheck {
                let (cluster, name) = {
                    let svc = item.lock().unwrap();
                    (svc.cluster_name().to_string(), svc.service_name())
                };
                if let Ok(Some(observed)) = api.describe_service(&cluster, &name) {
                    let mut svc = item.lock().unwrap();
                    svc.origin_service_exists = true;
                    svc.origin_desired_count = Some(observed.desired_count);
                    svc.running_count = Some(observed.running_count);
                    svc.origin_task_definition_arn = Some(observed.task_definition_arn);
                }
            }

            let origin_arn = item.lock().unwrap().origin_task_definition_arn.clone();
            if let Some(arn) = origin_arn {
                let td = api.describe_task_definition(&arn)?;
                item.lock().unwrap().origin_task_definition = td;
            }

            let mut svc = item.lock().unwrap();
            let report = svc.check_deploy();
            info!(family = svc.family.as_str(), mode = ?JobMode::CheckDeploy, "{report}");
            Ok(())
        });
    }

    /// Unlike a service, a CloudWatch Events target carries no queryable
    /// task-definition identity of its own — so a live scheduled task's
    /// origin is resolved by describing its *family*, which the control
    /// plane resolves to the latest active revision, not by an arn the rule
    /// never actually stores.
    fn check_deploy_scheduled_tasks(&self, tasks: &[Arc<Mutex<ScheduledTask>>]) {
        run_phase(tasks, self.worker_count(tasks.len()), &self.make_cloud_api, |item, api| {
            let (exists, family) = {
                let task = item.lock().unwrap();
                (task.task_exists, task.family.clone())
            };
            if exists {
                if let Some(td) = api.describe_task_definition(&family)? {
                    let mut task = item.lock().unwrap();
                    task.origin_task_definition_arn = td.arn.clone();
                    task.origin_task_definition = Some(td);
                }
            }

            let mut task = item.lock().unwrap();
            let report = task.check_deploy();
            info!(family = task.family.as_str(), mode = ?JobMode::CheckDeploy, "{report}");
            Ok(())
        });
    }

    /// Phase 5: partition desired services into the four deploy
    /// buckets by `(needs_stop_before_deploy, is_primary_placement)`.
    /// Orchestrator-local, single-threaded — no worker pool involved.
    fn partition(&self, services: &[Arc<Mutex<Service>>]) -> Buckets {
        let mut buckets = Buckets::default();
        for svc in services {
            let (needs_stop, primary) = {
                let locked = svc.lock().unwrap();
                (self.config.stop_before_deploy_enabled && locked.needs_stop_before_deploy(), locked.is_primary_placement)
            };
            match (needs_stop, primary) {
                (true, true) => buckets.primary_stop_before.push(svc.clone()),
                (true, false) => buckets.stop_before.push(svc.clone()),
                (false, true) => buckets.primary_deploy.push(svc.clone()),
                (false, false) => buckets.remain_deploy.push(svc.clone()),
            }
        }
        buckets
    }

    /// Phase 6: for every desired scheduled task whose rule already
    /// exists, disable it, stop its running tasks, and wait for them to stop.
    fn stop_scheduled_tasks(&self, tasks: &[Arc<Mutex<ScheduledTask>>]) {
        run_phase(tasks, self.worker_count(tasks.len()), &self.make_cloud_api, |item, api| {
            let (exists, cluster, family, schedule_expression, enabled) = {
                let task = item.lock().unwrap();
                (
                    task.task_exists,
                    task.cluster_name().to_string(),
                    task.family.clone(),
                    task.schedule_expression.clone(),
                    task.state == CloudwatchEventState::Enabled,
                )
            };
            if !exists {
                return Ok(());
            }
            if enabled {
                api.put_rule(&family, &schedule_expression, false)?;
                item.lock().unwrap().state = CloudwatchEventState::Disabled;
            }
            let running = api.list_running_tasks(&cluster, &family)?;
            for task_arn in &running {
                api.stop_task(&cluster, task_arn)?;
            }
            api.wait_tasks_stopped(&cluster, &running, self.config.service_wait_delay, self.config.service_wait_max_attempts)?;
            Ok(())
        });
    }

    /// Phase 7: scale `primary_stop_before ∪ stop_before` to zero and
    /// wait stable, primary first. This is the temporary in-flight override —
    /// it never touches `task_environment.desired_count` on the record.
    fn stop_before_deploy_phase(&self, primary: &[Arc<Mutex<Service>>], others: &[Arc<Mutex<Service>>]) {
        let all: Vec<_> = primary.iter().chain(others.iter()).cloned().collect();
        run_phase(&all, self.worker_count(all.len()), &self.make_cloud_api, |item, api| {
            let (cluster, name, arn) = {
                let svc = item.lock().unwrap();
                (svc.cluster_name().to_string(), svc.service_name(), svc.origin_task_definition_arn.clone().unwrap_or_default())
            };
            api.update_service(&cluster, &name, Some(0), &arn)?;
            Ok(())
        });
        run_phase(primary, self.worker_count(primary.len()), &self.make_cloud_api, |item, api| self.wait_stable_only(item, api));
        run_phase(others, self.worker_count(others.len()), &self.make_cloud_api, |item, api| self.wait_stable_only(item, api));
    }

    /// Phase 8: register the new task definition if it changed, then
    /// create-or-update. Sub-phase (a) `primary_deploy` waits stable
    /// immediately; sub-phase (b) deploys `remain_deploy` at the normal
    /// desired count and the stop-before buckets still pinned at zero, but
    /// only waits stable (and deregisters) on `remain_deploy` here — the
    /// stop-before buckets wait in phase 9, once their count is restored.
    fn deploy_services(
        &self,
        primary_deploy: &[Arc<Mutex<Service>>],
        remain_deploy: &[Arc<Mutex<Service>>],
        primary_stop_before: &[Arc<Mutex<Service>>],
        stop_before: &[Arc<Mutex<Service>>],
    ) {
        run_phase(primary_deploy, self.worker_count(primary_deploy.len()), &self.make_cloud_api, |item, api| {
            let dc = self.normal_desired_count(item);
            self.deploy_service(item, api, dc)
        });
        run_phase(primary_deploy, self.worker_count(primary_deploy.len()), &self.make_cloud_api, |item, api| {
            self.wait_stable_and_deregister(item, api)
        });

        run_phase(remain_deploy, self.worker_count(remain_deploy.len()), &self.make_cloud_api, |item, api| {
            let dc = self.normal_desired_count(item);
            self.deploy_service(item, api, dc)
        });

        let stopped_bucket: Vec<_> = primary_stop_before.iter().chain(stop_before.iter()).cloned().collect();
        run_phase(&stopped_bucket, self.worker_count(stopped_bucket.len()), &self.make_cloud_api, |item, api| {
            self.deploy_service(item, api, Some(0))
        });

        run_phase(remain_deploy, self.worker_count(remain_deploy.len()), &self.make_cloud_api, |item, api| {
            self.wait_stable_and_deregister(item, api)
        });
    }

    /// Phase 9: restore the real desired count on the stop-before
    /// buckets, primary first, waiting stable (and deregistering the prior
    /// task definition) after each group.
    fn start_after_deploy(&self, primary: &[Arc<Mutex<Service>>], others: &[Arc<Mutex<Service>>]) {
        for bucket in [primary, others] {
            run_phase(bucket, self.worker_count(bucket.len()), &self.make_cloud_api, |item, api| {
                let dc = self.normal_desired_count(item);
                let (cluster, name, arn) = {
                    let svc = item.lock().unwrap();
                    (svc.cluster_name().to_string(), svc.service_name(), svc.task_definition_arn.clone().unwrap_or_default())
                };
                api.update_service(&cluster, &name, dc, &arn)?;
                Ok(())
            });
            run_phase(bucket, self.worker_count(bucket.len()), &self.make_cloud_api, |item, api| self.wait_stable_and_deregister(item, api));
        }
    }

    /// Phase 10: register if changed, `put_rule` + `put_targets` +
    /// `add_permission` (the latter idempotent on `ResourceConflict`, a
    /// contract of the `CloudApi` implementation rather than this caller).
    fn deploy_scheduled_tasks(&self, tasks: &[Arc<Mutex<ScheduledTask>>]) {
        run_phase(tasks, self.worker_count(tasks.len()), &self.make_cloud_api, |item, api| {
            let same_td = item.lock().unwrap().is_same_task_definition;
            if same_td == Some(false) {
                let td = item.lock().unwrap().task_definition.clone();
                let registered = api.register_task_definition(&td)?;
                item.lock().unwrap().task_definition_arn = registered.arn.clone();
            }

            let (family, schedule_expression, target_lambda_arn, arn) = {
                let task = item.lock().unwrap();
                (
                    task.family.clone(),
                    task.schedule_expression.clone(),
                    task.target_lambda_arn.clone(),
                    task.task_definition_arn.clone().unwrap_or_default(),
                )
            };
            let rule_arn = api.put_rule(&family, &schedule_expression, true)?;
            let input_json = serde_json::json!({ "taskDefinitionArn": arn }).to_string();
            api.put_targets(&family, &target_lambda_arn, &input_json)?;
            api.add_permission(&target_lambda_arn, &rule_arn, &format!("{family}-invoke"))?;
            item.lock().unwrap().state = CloudwatchEventState::Enabled;
            Ok(())
        });
    }

    fn normal_desired_count(&self, item: &Arc<Mutex<Service>>) -> Option<u32> {
        let svc = item.lock().unwrap();
        if self.config.service_zero_keep && svc.origin_desired_count == Some(0) {
            Some(0)
        } else {
            svc.task_environment.desired_count
        }
    }

    fn deploy_service(&self, item: &Arc<Mutex<Service>>, api: &dyn CloudApi, desired_count_override: Option<u32>) -> Result<(), OrchestratorError> {
        let (same_td, cluster, name, origin_exists) = {
            let svc = item.lock().unwrap();
            (svc.is_same_task_definition, svc.cluster_name().to_string(), svc.service_name(), svc.origin_service_exists)
        };

        if same_td == Some(false) {
            let rendered_td = item.lock().unwrap().task_definition.clone();
            let registered = api.register_task_definition(&rendered_td)?;
            item.lock().unwrap().task_definition_arn = registered.arn.clone();
        }

        let arn = item
            .lock()
            .unwrap()
            .task_definition_arn
            .clone()
            .ok_or_else(|| OrchestratorError::Other(format!("service `{name}` has no task definition arn to deploy")))?;

        let observed = if origin_exists {
            api.update_service(&cluster, &name, desired_count_override, &arn)?
        } else {
            let svc = item.lock().unwrap();
            api.create_service(&cluster, &svc, &arn)?
        };

        let mut svc = item.lock().unwrap();
        svc.running_count = Some(observed.running_count);
        svc.desired_count = Some(observed.desired_count);
        Ok(())
    }

    fn wait_stable_only(&self, item: &Arc<Mutex<Service>>, api: &dyn CloudApi) -> Result<(), OrchestratorError> {
        let (cluster, name) = {
            let svc = item.lock().unwrap();
            (svc.cluster_name().to_string(), svc.service_name())
        };
        api.wait_for_stable(&cluster, &name, self.config.service_wait_delay, self.config.service_wait_max_attempts)?;
        Ok(())
    }

    /// Wait-stable policy: after a successful wait, deregister the prior task
    /// definition if a genuinely different one was registered.
    fn wait_stable_and_deregister(&self, item: &Arc<Mutex<Service>>, api: &dyn CloudApi) -> Result<(), OrchestratorError> {
        self.wait_stable_only(item, api)?;

        let (same_td, origin_arn) = {
            let svc = item.lock().unwrap();
            (svc.is_same_task_definition, svc.origin_task_definition_arn.clone())
        };
        if same_td == Some(false) {
            if let Some(arn) = origin_arn {
                api.deregister_task_definition(&arn)?;
            }
        }
        Ok(())
    }

    fn report(&self, services: &[Arc<Mutex<Service>>], scheduled_tasks: &[Arc<Mutex<ScheduledTask>>]) -> RunReport {
        RunReport {
            services: services
                .iter()
                .map(|s| {
                    let s = s.lock().unwrap();
                    ReportRecord { family: s.family.clone(), status: s.status }
                })
                .collect(),
            scheduled_tasks: scheduled_tasks
                .iter()
                .map(|t| {
                    let t = t.lock().unwrap();
                    ReportRecord { family: t.family.clone(), status: t.status }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_api::fake::FakeCloudApi;
    use crate::model::task_definition::TaskDefinition;
    use crate::model::TaskEnvironment;
    use serde_json::json;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            threads_count: 2,
            service_wait_delay: Duration::from_millis(1),
            service_wait_max_attempts: 2,
            service_zero_keep: false,
            stop_before_deploy_enabled: true,
            delete_unused_service: true,
        }
    }

    fn service(family: &str, desired_count: u32, image: &str) -> Service {
        let td = TaskDefinition::from_rendered_json(
            family.into(),
            json!({"containerDefinitions": [{"name": family, "image": image, "environment": [
                {"name": "ENVIRONMENT", "value": "stg"},
                {"name": "CLUSTER_NAME", "value": "main"},
                {"name": "DESIRED_COUNT", "value": desired_count.to_string()}
            ]}]}),
        )
        .unwrap();
        let env = TaskEnvironment {
            environment: "stg".into(),
            cluster_name: "main".into(),
            service_group: None,
            template_group: None,
            desired_count: Some(desired_count),
            task_count: None,
            target_lambda_arn: None,
            minimum_healthy_percent: 50,
            maximum_percent: 200,
            distinct_instance: false,
        };
        Service::new(family.into(), env, td, vec![], vec![], vec![], false, false)
    }

    #[test]
    fn create_from_empty_registers_and_creates() {
        let api = FakeCloudApi::new();
        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);

        let report = engine.run(vec![service("api", 2, "v1")], vec![]).unwrap();

        assert!(report.is_success());
        assert_eq!(api.call_count("register_task_definition"), 1);
        assert_eq!(api.call_count("create_service"), 1);
        assert_eq!(api.call_count("wait_for_stable"), 1);
        assert_eq!(api.call_count("deregister_task_definition"), 0);
    }

    #[test]
    fn unchanged_redeploy_skips_register_and_deregister() {
        let api = FakeCloudApi::new();
        let svc = service("api", 2, "v1");
        let registered_td = api.register_task_definition(&svc.task_definition).unwrap();
        api.seed_service(
            "main",
            crate::model::ObservedService {
                cluster_name: "main".into(),
                service_name: svc.service_name(),
                status: "ACTIVE".into(),
                task_definition_arn: registered_td.arn.clone().unwrap(),
                running_count: 2,
                desired_count: 2,
                task_environment: svc.task_environment.clone(),
            },
        );

        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);
        let report = engine.run(vec![svc], vec![]).unwrap();

        assert!(report.is_success());
        assert_eq!(api.call_count("register_task_definition"), 1); // only the seed call above
        assert_eq!(api.call_count("update_service"), 1);
        assert_eq!(api.call_count("deregister_task_definition"), 0);
    }

    #[test]
    fn diff_deploy_registers_new_and_deregisters_old() {
        let api = FakeCloudApi::new();
        let old_service = service("api", 2, "v1");
        let registered_td = api.register_task_definition(&old_service.task_definition).unwrap();
        api.seed_service(
            "main",
            crate::model::ObservedService {
                cluster_name: "main".into(),
                service_name: old_service.service_name(),
                status: "ACTIVE".into(),
                task_definition_arn: registered_td.arn.clone().unwrap(),
                running_count: 2,
                desired_count: 2,
                task_environment: old_service.task_environment.clone(),
            },
        );

        let new_service = service("api", 2, "v2");
        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);
        let report = engine.run(vec![new_service], vec![]).unwrap();

        assert!(report.is_success());
        assert_eq!(api.call_count("register_task_definition"), 2); // seed + new deploy
        assert_eq!(api.call_count("deregister_task_definition"), 1);
        assert_eq!(api.calls().iter().filter(|c| c.as_str() == format!("deregister_task_definition:{}", registered_td.arn.unwrap())).count(), 1);
    }

    #[test]
    fn delete_unused_service_is_scaled_down_then_deleted() {
        let api = FakeCloudApi::new();
        api.seed_service(
            "main",
            crate::model::ObservedService {
                cluster_name: "main".into(),
                service_name: "ghost-service".into(),
                status: "ACTIVE".into(),
                task_definition_arn: "arn:ghost".into(),
                running_count: 1,
                desired_count: 1,
                task_environment: TaskEnvironment {
                    environment: "stg".into(),
                    cluster_name: "main".into(),
                    service_group: None,
                    template_group: None,
                    desired_count: Some(1),
                    task_count: None,
                    target_lambda_arn: None,
                    minimum_healthy_percent: 50,
                    maximum_percent: 200,
                    distinct_instance: false,
                },
            },
        );

        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);
        let report = engine.run(vec![], vec![]).unwrap();

        assert!(report.is_success());
        assert_eq!(api.call_count("update_service"), 1);
        assert_eq!(api.call_count("delete_service"), 1);
    }

    #[test]
    fn no_delete_unused_service_issues_no_calls() {
        let api = FakeCloudApi::new();
        api.seed_service(
            "main",
            crate::model::ObservedService {
                cluster_name: "main".into(),
                service_name: "ghost-service".into(),
                status: "ACTIVE".into(),
                task_definition_arn: "arn:ghost".into(),
                running_count: 1,
                desired_count: 1,
                task_environment: TaskEnvironment {
                    environment: "stg".into(),
                    cluster_name: "main".into(),
                    service_group: None,
                    template_group: None,
                    desired_count: Some(1),
                    task_count: None,
                    target_lambda_arn: None,
                    minimum_healthy_percent: 50,
                    maximum_percent: 200,
                    distinct_instance: false,
                },
            },
        );

        let mut config = engine_config();
        config.delete_unused_service = false;
        let engine = Engine::new(config, || Box::new(api.clone()) as Box<dyn CloudApi>);
        engine.run(vec![], vec![]).unwrap();

        assert_eq!(api.call_count("update_service"), 0);
        assert_eq!(api.call_count("delete_service"), 0);
    }

    #[test]
    fn stop_before_deploy_primary_goes_through_zero_then_restores() {
        let api = FakeCloudApi::new();
        let mut batch = service("batch", 3, "v1");
        batch.stop_before_deploy = true;
        batch.is_primary_placement = true;

        let registered_td = api.register_task_definition(&service("batch", 3, "v0").task_definition).unwrap();
        api.seed_service(
            "main",
            crate::model::ObservedService {
                cluster_name: "main".into(),
                service_name: batch.service_name(),
                status: "ACTIVE".into(),
                task_definition_arn: registered_td.arn.clone().unwrap(),
                running_count: 3,
                desired_count: 3,
                task_environment: batch.task_environment.clone(),
            },
        );

        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);
        let report = engine.run(vec![batch], vec![]).unwrap();

        assert!(report.is_success());
        // stop-before-deploy(0) -> deploy(0) -> start-after(3): three update_service calls,
        // but only two wait-stable drains (stop-before-deploy's wait, start-after's wait;
        // the deploy-phase update to zero is not followed by a wait of its own).
        assert_eq!(api.call_count("update_service"), 3);
        assert_eq!(api.call_count("wait_for_stable"), 2);

        let described = api.describe_service("main", "batch-service").unwrap().unwrap();
        assert_eq!(described.desired_count, 3);
    }

    #[test]
    fn scheduled_task_lifecycle_registers_once_and_swallows_permission_conflict() {
        let api = FakeCloudApi::new();
        let env = TaskEnvironment {
            environment: "stg".into(),
            cluster_name: "main".into(),
            service_group: None,
            template_group: None,
            desired_count: None,
            task_count: Some(1),
            target_lambda_arn: Some("arn:aws:lambda:fn".into()),
            minimum_healthy_percent: 50,
            maximum_percent: 200,
            distinct_instance: false,
        };
        let td = TaskDefinition::from_rendered_json(
            "nightly".into(),
            json!({"containerDefinitions": [{"name": "nightly", "environment": [
                {"name": "ENVIRONMENT", "value": "stg"},
                {"name": "CLUSTER_NAME", "value": "main"},
                {"name": "TASK_COUNT", "value": "1"},
                {"name": "TARGET_LAMBDA_ARN", "value": "arn:aws:lambda:fn"}
            ]}]}),
        )
        .unwrap();
        let task = ScheduledTask::new("nightly".into(), env, td, "rate(1 hour)".into(), "arn:aws:lambda:fn".into(), vec![]);

        let engine = Engine::new(engine_config(), || Box::new(api.clone()) as Box<dyn CloudApi>);
        let report = engine.run(vec![], vec![task.clone()]).unwrap();
        assert!(report.is_success());
        assert_eq!(api.call_count("register_task_definition"), 1);
        assert_eq!(api.call_count("put_rule"), 1);
        assert_eq!(api.call_count("add_permission"), 1);

        // second run against unchanged config: no new task-definition revision.
        let report2 = engine.run(vec![], vec![task]).unwrap();
        assert!(report2.is_success());
        assert_eq!(api.call_count("register_task_definition"), 1);
    }
}
