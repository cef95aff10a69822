//! Container network and service reconcilers.
//!
//! Services follow a stale-then-retry pattern: a stopped container is removed
//! before provisioning, and a provisioning task that reports failure is not
//! trusted either way.  The container must be running and answer its health
//! check within the [`Readiness`] window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rigup_hal::{ContainerRuntime, TaskRunner};
use rigup_kernel::VerifiedExecutor;
use rigup_kernel::probe::{probe_container, probe_health, probe_network};
use rigup_types::{ConvergenceOutcome, DesiredState, ManagedResource, RigError};
use tracing::debug;

use super::{Lifecycle, remedy, wrong_descriptor};

/// How long to wait for a freshly provisioned service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

impl Readiness {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }
}

pub fn reconcile_network(
    resource: &ManagedResource,
    rt: &mut dyn ContainerRuntime,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::NetworkPresent = resource.desired() else {
        return wrong_descriptor(resource, "network");
    };
    let network = resource.name();
    let mut lc = Lifecycle::start(resource);
    match probe_network(rt, network) {
        Ok(snap) if !lc.probed(&snap) => return lc.satisfied(),
        Ok(_) => {}
        Err(e) => return lc.failed(e),
    }

    let name = resource.to_string();
    let result = exec
        .execute(&name, "create", || rt.create_network(network))
        .and_then(|out| exec.verify(&name, out, || rt.network_exists(network)))
        .and_then(|verified| {
            if !verified.confirmed {
                return Err(RigError::ActionFailedUnverifiable {
                    resource: name.clone(),
                    details: verified.reported(),
                    remedy: remedy([format!("docker network create {network}")]),
                });
            }
            Ok(verified
                .misreported()
                .then(|| format!("create reported {}; network exists", verified.reported())))
        });
    lc.finish(result)
}

pub fn reconcile_service(
    resource: &ManagedResource,
    rt: &mut dyn ContainerRuntime,
    tasks: &mut dyn TaskRunner,
    readiness: &Readiness,
    interrupted: &AtomicBool,
    exec: &mut VerifiedExecutor,
) -> ConvergenceOutcome {
    let DesiredState::ServiceRunning {
        provision_task,
        health_check,
    } = resource.desired()
    else {
        return wrong_descriptor(resource, "service");
    };
    let container = resource.name();
    let mut lc = Lifecycle::start(resource);
    let snapshot = match probe_container(rt, container) {
        Ok(s) => s,
        Err(e) => return lc.failed(e),
    };
    if !lc.probed(&snapshot) {
        return lc.satisfied();
    }

    let name = resource.to_string();
    let result = (|| -> Result<Option<String>, RigError> {
        if snapshot.detail("state") == Some("stopped") {
            let out = exec.execute(&name, "remove stale", || rt.remove(container))?;
            let removed = exec.verify(&name, out, || Ok(!probe_container(rt, container)?.present))?;
            if !removed.confirmed {
                return Err(RigError::ActionFailedUnverifiable {
                    resource: name.clone(),
                    details: format!("stale container could not be removed ({})", removed.reported()),
                    remedy: remedy([format!("docker rm -f {container}")]),
                });
            }
        }

        let out = exec.execute(&name, "provision", || tasks.run_task(provision_task))?;
        let verified = exec.verify(&name, out, || {
            wait_ready(rt, container, health_check, readiness, interrupted)
        })?;
        if !verified.confirmed {
            return Err(RigError::ActionFailedUnverifiable {
                resource: name.clone(),
                details: format!(
                    "provisioning reported {}; not healthy after {} checks",
                    verified.reported(),
                    readiness.attempts
                ),
                remedy: remedy([tasks.command_for(provision_task), format!("docker logs {container}")]),
            });
        }
        Ok(verified
            .misreported()
            .then(|| format!("provisioning reported {}; service is healthy", verified.reported())))
    })();
    lc.finish(result)
}

/// Poll until the container runs and its health check passes.
fn wait_ready(
    rt: &dyn ContainerRuntime,
    container: &str,
    health_check: &[String],
    readiness: &Readiness,
    interrupted: &AtomicBool,
) -> Result<bool, RigError> {
    for attempt in 1..=readiness.attempts {
        if interrupted.load(Ordering::SeqCst) {
            debug!(container, attempt, "interrupted; no longer waiting");
            return Ok(false);
        }
        let running = probe_container(rt, container)?.matches_desired;
        if running && (health_check.is_empty() || probe_health(rt, container, health_check)?) {
            return Ok(true);
        }
        debug!(container, attempt, running, "not ready");
        if attempt < readiness.attempts {
            thread::sleep(readiness.interval);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigup_hal::sim::{SimWorld, TaskEffect};
    use rigup_types::ResourceKind;

    fn postgres() -> ManagedResource {
        ManagedResource::new(
            ResourceKind::ContainerService,
            "postgres",
            DesiredState::ServiceRunning {
                provision_task: "db:up".into(),
                health_check: vec!["pg_isready".into()],
            },
        )
    }

    fn quick() -> Readiness {
        Readiness::new(3, Duration::ZERO)
    }

    #[test]
    fn running_service_is_satisfied() {
        let world = SimWorld::new().with_container("postgres", true);
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        assert_eq!(outcome, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(world.action_count(), 0);
    }

    #[test]
    fn absent_service_is_provisioned() {
        let world = SimWorld::new().with_task("db:up", 0, TaskEffect::StartContainer("postgres".into()));
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        assert_eq!(world.actions(), vec!["task db:up"]);
    }

    #[test]
    fn misreported_provisioning_converges_with_warning() {
        let world = SimWorld::new().with_task("db:up", 1, TaskEffect::StartContainer("postgres".into()));
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        let ConvergenceOutcome::ConvergedWithWarning(reason) = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert!(reason.contains("exit 1"));
    }

    #[test]
    fn stopped_container_is_removed_first() {
        let world = SimWorld::new()
            .with_container("postgres", false)
            .with_task("db:up", 0, TaskEffect::StartContainer("postgres".into()));
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        assert!(outcome.is_converged());
        assert_eq!(world.actions(), vec!["rm postgres", "task db:up"]);
    }

    #[test]
    fn unhealthy_after_failed_provisioning_is_fatal() {
        let world = SimWorld::new().with_task("db:up", 1, TaskEffect::StartContainer("postgres".into()));
        world.state_mut().unhealthy.insert("postgres".into());
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        let ConvergenceOutcome::Failed(err) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(err, RigError::ActionFailedUnverifiable { .. }));
        assert_eq!(err.remedy(), ["task db:up", "docker logs postgres"]);
    }

    #[test]
    fn interrupt_stops_readiness_polling() {
        let world = SimWorld::new().with_task("db:up", 0, TaskEffect::StartContainer("postgres".into()));
        world.state_mut().unhealthy.insert("postgres".into());
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &Readiness::new(30, Duration::from_millis(200)),
            &AtomicBool::new(true),
            &mut VerifiedExecutor::new(),
        );
        assert!(outcome.is_failed());
        assert_eq!(world.state().health_pings, 0);
        assert_eq!(world.actions(), vec!["task db:up"]);
    }

    #[test]
    fn readiness_polls_up_to_attempts() {
        let world = SimWorld::new().with_task("db:up", 0, TaskEffect::StartContainer("postgres".into()));
        world.state_mut().unhealthy.insert("postgres".into());
        let outcome = reconcile_service(
            &postgres(),
            &mut world.container_runtime(),
            &mut world.task_runner(),
            &quick(),
            &AtomicBool::new(false),
            &mut VerifiedExecutor::new(),
        );
        assert!(outcome.is_failed());
        assert_eq!(world.state().health_pings, 3);
    }

    #[test]
    fn existing_network_is_satisfied() {
        let world = SimWorld::new().with_network("app-net");
        let res = ManagedResource::new(ResourceKind::ContainerNetwork, "app-net", DesiredState::NetworkPresent);
        let outcome = reconcile_network(&res, &mut world.container_runtime(), &mut VerifiedExecutor::new());
        assert_eq!(outcome, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(world.action_count(), 0);
    }

    #[test]
    fn network_created_when_absent() {
        let world = SimWorld::new();
        let res = ManagedResource::new(ResourceKind::ContainerNetwork, "app-net", DesiredState::NetworkPresent);
        let outcome = reconcile_network(&res, &mut world.container_runtime(), &mut VerifiedExecutor::new());
        assert_eq!(outcome, ConvergenceOutcome::Converged);
        assert!(world.state().networks.contains("app-net"));

        world.clear_actions();
        let again = reconcile_network(&res, &mut world.container_runtime(), &mut VerifiedExecutor::new());
        assert_eq!(again, ConvergenceOutcome::AlreadySatisfied);
        assert_eq!(world.action_count(), 0);
    }
}
