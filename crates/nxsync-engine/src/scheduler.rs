//! Cron-driven daemon loop: runs one backup immediately, then fires
//! `sync_once` on a schedule until `SIGINT`/`SIGTERM`.

use crate::orchestrator::{RunSummary, SyncOptions, SyncOrchestrator};
use anyhow::{Context, Result};
use nxsync_core::error::NxsyncError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Builds `SyncOptions` for each firing. Cron jobs run on their own clock,
/// so the scheduler needs a way to produce fresh options per run rather than
/// a single borrowed value.
pub trait SyncOptionsFactory: Send + Sync + 'static {
    fn build(&self) -> SyncOptions;
}

impl<F> SyncOptionsFactory for F
where
    F: Fn() -> SyncOptions + Send + Sync + 'static,
{
    fn build(&self) -> SyncOptions {
        self()
    }
}

/// Runs `orchestrator.sync_once(..)` on a cron schedule until a shutdown
/// signal arrives. Returns once the scheduler has stopped all jobs.
pub async fn run_daemon(
    orchestrator: Arc<SyncOrchestrator>,
    schedule: &str,
    options_factory: Arc<dyn SyncOptionsFactory>,
) -> Result<()> {
    let scheduler = JobScheduler::new()
        .await
        .context("creating cron scheduler")?;

    let running = Arc::new(AtomicBool::new(false));
    let job_orchestrator = orchestrator.clone();
    let job_options_factory = options_factory.clone();
    let job_running = running.clone();

    // Validate (and build) the cron job before doing any work: an invalid
    // --schedule must abort here, not after a full backup has already run.
    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let orchestrator = job_orchestrator.clone();
        let options_factory = job_options_factory.clone();
        let running = job_running.clone();

        Box::pin(async move {
            if running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!("previous backup still running, skipping this firing");
                return;
            }

            match orchestrator.sync_once(options_factory.build()).await {
                Ok(summary) => log_summary(&summary),
                Err(e) => error!("scheduled backup failed: {e:#}"),
            }

            running.store(false, Ordering::SeqCst);
        })
    })
    .map_err(|e| NxsyncError::Validation(format!("invalid cron expression {schedule:?}: {e}")))?;

    info!("running initial backup before entering cron loop");
    match orchestrator.sync_once(options_factory.build()).await {
        Ok(summary) => log_summary(&summary),
        Err(e) => error!("initial backup failed: {e:#}"),
    }

    scheduler.add(job).await.context("registering cron job")?;
    scheduler.start().await.context("starting cron scheduler")?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler");

    scheduler
        .shutdown()
        .await
        .context("stopping cron scheduler")?;

    Ok(())
}

fn log_summary(summary: &RunSummary) {
    if summary.total == 0 {
        info!("backup complete: nothing to upload");
    } else {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "backup complete"
        );
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sig) => sig,
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}, relying on SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOptions;
    impl SyncOptionsFactory for FixedOptions {
        fn build(&self) -> SyncOptions {
            SyncOptions {
                source_dir: std::path::PathBuf::from("."),
                remote_target: "/backup".to_string(),
                cores: Some(1),
                force: false,
                resume: false,
                chunk_size_mib: 50,
                quiet: true,
                verbose: false,
                scan_concurrency: 1,
                include_hidden: false,
                hash_cache_path: std::path::PathBuf::from("/tmp/nxsync-test-cache.json"),
                scanner_state_path: std::path::PathBuf::from("/tmp/nxsync-test-scanner.json"),
                resume_state_dir: std::path::PathBuf::from("/tmp/nxsync-test-resume"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let scheduler = JobScheduler::new().await.unwrap();
        let result = Job::new_async("not a cron expression", |_uuid, _lock| Box::pin(async {}));
        assert!(result.is_err());
        scheduler.shutdown().await.ok();
    }

    #[test]
    fn factory_closure_satisfies_trait() {
        let factory: Arc<dyn SyncOptionsFactory> = Arc::new(FixedOptions);
        let opts = factory.build();
        assert_eq!(opts.remote_target, "/backup");
    }

    struct CountingRemote {
        checks: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl nxsync_remote::RemoteOps for CountingRemote {
        async fn check_availability(&self) -> nxsync_remote::Availability {
            self.checks.fetch_add(1, Ordering::SeqCst);
            nxsync_remote::Availability {
                installed: false,
                authenticated: false,
                version: None,
                error: Some("unavailable in test".to_string()),
            }
        }
        async fn upload_file(&self, _: &std::path::Path, _: &str) -> nxsync_remote::TransferOutcome {
            Default::default()
        }
        async fn upload_file_streamed(
            &self,
            _: &std::path::Path,
            _: &str,
            _: &(dyn Fn(u8) + Send + Sync),
        ) -> nxsync_remote::TransferOutcome {
            Default::default()
        }
        async fn download_file(&self, _: &str, _: &std::path::Path) -> nxsync_remote::TransferOutcome {
            Default::default()
        }
        async fn download_file_streamed(
            &self,
            _: &str,
            _: &std::path::Path,
            _: &(dyn Fn(u8) + Send + Sync),
        ) -> nxsync_remote::TransferOutcome {
            Default::default()
        }
        async fn create_folder(&self, _: &str) -> nxsync_remote::TransferOutcome {
            Default::default()
        }
        async fn list_files(
            &self,
            _: &str,
        ) -> Result<Vec<nxsync_core::types::RemoteFileEntry>, String> {
            Ok(vec![])
        }
        async fn file_exists(&self, _: &str) -> bool {
            false
        }
        async fn delete_file(&self, _: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn invalid_schedule_aborts_before_any_backup_runs() {
        let remote = Arc::new(CountingRemote {
            checks: std::sync::atomic::AtomicU32::new(0),
        });
        let orchestrator = Arc::new(SyncOrchestrator::new(remote.clone()));
        let factory: Arc<dyn SyncOptionsFactory> = Arc::new(FixedOptions);

        let result = run_daemon(orchestrator, "not a cron expression", factory).await;

        assert!(result.is_err());
        assert_eq!(remote.checks.load(Ordering::SeqCst), 0);
    }
}
