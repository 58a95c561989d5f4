use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::listener::{ListenerFactory, ListenerSpec, RestartType, ShutdownPolicy};

/// Runs one supervised task per listener spec
///
/// A child that exits is restarted according to its spec. More than
/// `max_restarts` restarts within `restart_window` make the supervisor give
/// up on that child and log it.
pub struct ListenerSupervisor {
    children: Vec<Child>,
}

struct Child {
    spec: ListenerSpec,
    task: JoinHandle<()>,
}

/// Aborts the running attempt when the supervising task goes away
struct Attempt(JoinHandle<Result<()>>);

impl Drop for Attempt {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ListenerSupervisor {
    pub fn start(specs: Vec<ListenerSpec>, factory: Arc<dyn ListenerFactory>, config: &SupervisorConfig) -> Self {
        let children = specs
            .into_iter()
            .map(|spec| {
                let task = tokio::spawn(supervise(
                    spec.clone(),
                    factory.clone(),
                    config.max_restarts,
                    config.restart_window(),
                ));
                Child { spec, task }
            })
            .collect::<Vec<_>>();

        info!(listeners = children.len(), "Listener supervisor started");
        Self { children }
    }

    pub fn specs(&self) -> impl Iterator<Item = &ListenerSpec> {
        self.children.iter().map(|child| &child.spec)
    }

    /// Number of children still supervised
    pub fn running(&self) -> usize {
        self.children.iter().filter(|child| !child.task.is_finished()).count()
    }

    /// Stop every child according to its shutdown policy
    pub async fn shutdown(self) {
        for mut child in self.children {
            match child.spec.policy.shutdown {
                ShutdownPolicy::BrutalKill => child.task.abort(),
                ShutdownPolicy::Timeout(grace) => {
                    if tokio::time::timeout(grace, &mut child.task).await.is_err() {
                        child.task.abort();
                    }
                }
            }
            debug!(listener = %child.spec.name, "Listener stopped");
        }
        info!("Listener supervisor stopped");
    }
}

async fn supervise(spec: ListenerSpec, factory: Arc<dyn ListenerFactory>, max_restarts: u32, window: Duration) {
    let mut restarts: VecDeque<Instant> = VecDeque::new();

    loop {
        debug!(listener = %spec.name, "Starting listener");
        let mut attempt = {
            let factory = factory.clone();
            let (protocol, port) = (spec.protocol, spec.port);
            Attempt(tokio::spawn(async move { factory.run(protocol, port).await }))
        };

        let failed = match (&mut attempt.0).await {
            Ok(Ok(())) => {
                info!(listener = %spec.name, "Listener exited");
                false
            }
            Ok(Err(e)) => {
                warn!(listener = %spec.name, error = %e, "Listener failed");
                true
            }
            Err(e) => {
                error!(listener = %spec.name, error = %e, "Listener task crashed");
                true
            }
        };

        let restart = match spec.policy.restart {
            RestartType::Permanent => true,
            RestartType::Transient => failed,
            RestartType::Temporary => false,
        };
        if !restart {
            return;
        }

        let now = Instant::now();
        restarts.push_back(now);
        while restarts
            .front()
            .map_or(false, |first| now.duration_since(*first) > window)
        {
            restarts.pop_front();
        }
        if restarts.len() > max_restarts as usize {
            error!(
                listener = %spec.name,
                max_restarts,
                ?window,
                "Listener restarting too often, giving up"
            );
            return;
        }

        if !spec.policy.delay.is_zero() {
            tokio::time::sleep(spec.policy.delay).await;
        }
    }
}
