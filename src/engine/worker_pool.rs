use crate::cloud_api::CloudApi;
use crate::errors::OrchestratorError;
use crate::model::{Identified, RecordStatus};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

/// Runs `job` for every record in `items`, spread across `worker_count`
/// worker threads, each owning its own `CloudApi` handle. Blocks until every
/// record has been dequeued and processed — this call *is* the phase-boundary
/// drain.
///
/// A bounded pool of `std::thread::scope`-scoped workers pulling off a shared
/// queue: an `mpsc::Receiver` guarded by a `Mutex` so every worker can pull
/// from the same channel.
///
/// A job that returns `Err` or panics flips that record's status to
/// `RecordStatus::Error` (caught via `catch_unwind` at the worker boundary)
/// and does not stop other workers.
pub fn run_phase<T, F, CF>(items: &[Arc<Mutex<T>>], worker_count: usize, make_cloud_api: CF, job: F)
where
    T: Identified + Send,
    F: Fn(&Arc<Mutex<T>>, &dyn CloudApi) -> Result<(), OrchestratorError> + Sync,
    CF: Fn() -> Box<dyn CloudApi> + Sync,
{
    if items.is_empty() {
        return;
    }
    let worker_count = worker_count.min(items.len()).max(1);

    let (tx, rx) = mpsc::channel::<&Arc<Mutex<T>>>();
    for item in items {
        tx.send(item).expect("receiver outlives this phase's senders");
    }
    drop(tx);
    let rx = Mutex::new(rx);

    thread::scope(|scope| {
        let rx = &rx;
        let job = &job;
        for _ in 0..worker_count {
            let cloud_api = make_cloud_api();
            scope.spawn(move || loop {
                let received = { rx.lock().unwrap().recv() };
                let Ok(item) = received else { break };

                if item.lock().unwrap().status() == RecordStatus::Error {
                    continue;
                }

                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(item, cloud_api.as_ref())));
                let failed = match outcome {
                    Ok(Ok(())) => false,
                    Ok(Err(err)) => {
                        error!(family = item.lock().unwrap().family(), error = %err, "record job failed");
                        true
                    }
                    Err(_) => {
                        error!(family = item.lock().unwrap().family(), "record job panicked");
                        true
                    }
                };
                if failed {
                    item.lock().unwrap().set_status(RecordStatus::Error);
                }
            });
        }
    });
}

/// Parallel best-effort map with no status tracking, for phases over
/// records that carry no `RecordStatus` (fetch resolution, delete-unused).
/// Errors are logged, never propagated: deletion/fetch of ghosts is
/// explicitly out of the exit-code contract.
pub fn parallel_for_each<T, F, CF>(items: &[T], worker_count: usize, make_cloud_api: CF, job: F)
where
    T: Sync,
    F: Fn(&T, &dyn CloudApi) + Sync,
    CF: Fn() -> Box<dyn CloudApi> + Sync,
{
    if items.is_empty() {
        return;
    }
    let worker_count = worker_count.min(items.len()).max(1);

    let (tx, rx) = mpsc::channel::<&T>();
    for item in items {
        tx.send(item).expect("receiver outlives this phase's senders");
    }
    drop(tx);
    let rx = Mutex::new(rx);

    thread::scope(|scope| {
        let rx = &rx;
        let job = &job;
        for _ in 0..worker_count {
            let cloud_api = make_cloud_api();
            scope.spawn(move || loop {
                let received = { rx.lock().unwrap().recv() };
                let Ok(item) = received else { break };
                job(item, cloud_api.as_ref());
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_api::fake::FakeCloudApi;
    use crate::model::service::Service;
    use crate::model::task_definition::TaskDefinition;
    use crate::model::TaskEnvironment;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(name: &str) -> Arc<Mutex<Service>> {
        let env = TaskEnvironment {
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
        };
        let td = TaskDefinition::from_rendered_json(name.into(), json!({"containerDefinitions": [{"name": name}]})).unwrap();
        Arc::new(Mutex::new(Service::new(name.into(), env, td, vec![], vec![], vec![], false, false)))
    }

    #[test]
    fn every_record_is_visited_exactly_once() {
        let items: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| service(n)).collect();
        let visits = AtomicUsize::new(0);
        run_phase(
            &items,
            2,
            || Box::new(FakeCloudApi::new()) as Box<dyn CloudApi>,
            |_item, _api| {
                visits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        assert_eq!(visits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn failing_job_flips_status_without_stopping_others() {
        let items: Vec<_> = ["a", "b"].iter().map(|n| service(n)).collect();
        run_phase(
            &items,
            2,
            || Box::new(FakeCloudApi::new()) as Box<dyn CloudApi>,
            |item, _api| {
                let locked = item.lock().unwrap();
                if locked.family == "a" {
                    drop(locked);
                    Err(OrchestratorError::Other("boom".to_string()))
                } else {
                    Ok(())
                }
            },
        );
        assert_eq!(items[0].lock().unwrap().status, RecordStatus::Error);
        assert_eq!(items[1].lock().unwrap().status, RecordStatus::Normal);
    }

    #[test]
    fn panicking_job_flips_status_too() {
        let items: Vec<_> = ["a"].iter().map(|n| service(n)).collect();
        run_phase(&items, 1, || Box::new(FakeCloudApi::new()) as Box<dyn CloudApi>, |_item, _api| {
            panic!("boom");
        });
        assert_eq!(items[0].lock().unwrap().status, RecordStatus::Error);
    }

    #[test]
    fn errored_record_is_skipped_in_later_phases() {
        let items: Vec<_> = ["a", "b"].iter().map(|n| service(n)).collect();
        items[0].lock().unwrap().set_status(RecordStatus::Error);

        let visits = AtomicUsize::new(0);
        run_phase(
            &items,
            2,
            || Box::new(FakeCloudApi::new()) as Box<dyn CloudApi>,
            |_item, _api| {
                visits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        assert_eq!(visits.load(Ordering::SeqCst), 1);
        assert_eq!(items[0].lock().unwrap().status, RecordStatus::Error);
        assert_eq!(items[1].lock().unwrap().status, RecordStatus::Normal);
    }
}
