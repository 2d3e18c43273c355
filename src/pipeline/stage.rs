//! Shared state of the stage builders and runners of one run.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

use super::config::Configuration;
use crate::error::RunError;
use crate::execution::{ExecContext, Location, RunOptions};
use crate::folders::Folders;

/// Everything a stage needs: the run's execution context, configuration,
/// naming, and the host processes are launched on.
#[derive(Debug, Clone)]
pub struct StageEnv {
    pub ctx: ExecContext,
    pub config: Arc<Configuration>,
    pub folders: Folders,
    /// Host owning the stage directories and running the binaries.
    pub host: String,
    /// Number of domains of the run.
    pub domains: u32,
}

impl StageEnv {
    pub fn new(
        ctx: ExecContext,
        config: Arc<Configuration>,
        folders: Folders,
        domains: u32,
    ) -> Self {
        let host = folders.root().host().to_string();
        Self {
            ctx,
            config,
            folders,
            host,
            domains,
        }
    }

    /// A configured static directory, addressed on the main host.
    pub fn static_dir(&self, path: &Path) -> Location {
        Location::new(self.host.as_str(), path)
    }

    pub fn namelists_dir(&self) -> Location {
        self.static_dir(&self.config.folders.namelists_dir)
    }

    /// Domains of the run, in order.
    pub fn domain_numbers(&self) -> impl Iterator<Item = u32> {
        1..=self.domains
    }

    /// Options running in `cwd` with the configured environment overrides.
    pub fn run_options(&self, cwd: &Location) -> RunOptions {
        RunOptions::new(cwd.path()).with_env(self.config.env_vars())
    }

    /// Launches `exe` in `cwd` under mpirun with `procs` processes.
    pub async fn mpirun(&self, cwd: &Location, procs: u32, exe: &str, log_file: &str) {
        let args = vec!["-n".to_string(), procs.to_string(), exe.to_string()];
        let options = self.run_options(cwd).with_log_file(log_file);
        self.ctx.run(&self.host, "mpirun", &args, &options).await;
    }

    /// Launches `exe` in `cwd` directly.
    pub async fn exec(&self, cwd: &Location, exe: &str, args: &[String]) {
        let options = self.run_options(cwd);
        self.ctx.run(&self.host, exe, args, &options).await;
    }

    /// Fails with a conflict if any of `dirs` already exists.
    ///
    /// Returns true when the stage may proceed.
    pub async fn ensure_absent(&self, dirs: &[Location], stage: &str) -> bool {
        for dir in dirs {
            if self.ctx.exists(dir).await {
                warn!(location = %dir, stage, "Working directory already exists");
                self.ctx.fail(RunError::conflict(dir, stage));
                return false;
            }
        }
        !self.ctx.is_failed()
    }

    /// Runs `task` for every domain, at most `max_parallel_domains` at a time,
    /// and waits for all of them.
    pub async fn for_each_domain<F, Fut>(&self, task: F)
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = ()>,
    {
        fan_out(
            self.config.run.max_parallel_domains,
            self.domain_numbers(),
            task,
        )
        .await;
    }
}

/// Runs `task` for every item with bounded concurrency and joins them.
pub async fn fan_out<I, F, Fut>(limit: usize, items: I, task: F)
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = ()>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;

    let futures: Vec<_> = items
        .into_iter()
        .map(|item| {
            let work = task(item);
            async move {
                let _permit = semaphore.acquire().await.ok();
                work.await;
            }
        })
        .collect();

    futures::future::join_all(futures).await;
}
