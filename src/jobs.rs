use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Report computations started in the background. The owner must call
/// [`ReportJobs::wait`] before releasing the storage the jobs write to.
pub struct ReportJobs {
    tasks: JoinSet<(Uuid, anyhow::Result<()>)>,
}

impl Default for ReportJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportJobs {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, class_id: Uuid, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move { (class_id, job.await) });
        debug!(%class_id, in_flight = self.tasks.len(), "report job spawned");
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub async fn wait(mut self) -> JobSummary {
        let mut summary = JobSummary::default();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((class_id, Ok(()))) => {
                    summary.completed += 1;
                    info!(%class_id, "report job finished");
                }
                Ok((class_id, Err(err))) => {
                    summary.failed += 1;
                    error!(%class_id, "report job failed: {err:#}");
                }
                Err(err) => {
                    summary.failed += 1;
                    error!("report job did not run to completion: {err}");
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn finish_with(outcome: anyhow::Result<()>) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        outcome
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("engine bug")
    }

    #[tokio::test]
    async fn wait_drains_every_job() {
        let mut jobs = ReportJobs::new();
        for _ in 0..3 {
            jobs.spawn(Uuid::new_v4(), finish_with(Ok(())));
        }
        assert_eq!(jobs.in_flight(), 3);

        let summary = jobs.wait().await;
        assert_eq!(
            summary,
            JobSummary {
                completed: 3,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let mut jobs = ReportJobs::new();
        jobs.spawn(Uuid::new_v4(), finish_with(Ok(())));
        jobs.spawn(
            Uuid::new_v4(),
            finish_with(Err(anyhow::anyhow!(
                "a report has already been generated for this class"
            ))),
        );
        jobs.spawn(Uuid::new_v4(), explode());

        let summary = jobs.wait().await;
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn waiting_with_nothing_spawned_returns_immediately() {
        let summary = ReportJobs::new().wait().await;
        assert_eq!(summary, JobSummary::default());
    }
}
