//! Cycle and phase orchestration.
//!
//! The `Orchestrator` drives a forecast run through its stages:
//! - date working directory preparation on every host
//! - WPS and real, for phases that preprocess
//! - three cycles of DA and WRF, for phases that assimilate
//!
//! Each run gets a fresh execution context; the first error recorded by any
//! stage ends the run and is returned to the caller.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::config::Configuration;
use super::stage::StageEnv;
use super::types::{format_compact_date, Cycle, ForecastRun, RunPhase, StepKind};
use super::{da, workdir, wps, wrf};
use crate::error::RunError;
use crate::execution::{ExecContext, LocalSubstrate, Location, Substrate};
use crate::folders::Folders;
use crate::namelist::resolve_domain_count;

/// Counters of the runs executed by an orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Drives forecast runs under a run tree.
pub struct Orchestrator {
    config: Arc<Configuration>,
    folders: Folders,
    substrate: Arc<dyn Substrate>,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Orchestrator {
    /// Creates an orchestrator for the run tree at `root`, addressed on the
    /// configuration's main host.
    pub fn new(
        config: Configuration,
        root: impl Into<PathBuf>,
        substrate: Arc<dyn Substrate>,
    ) -> Self {
        let root = Location::new(config.main_host(), root);
        let folders = Folders::new(root, &config.folders);
        Self {
            config: Arc::new(config),
            folders,
            substrate,
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Creates an orchestrator running everything on the local machine.
    pub fn local(config: Configuration, root: impl Into<PathBuf>) -> Self {
        Self::new(config, root, Arc::new(LocalSubstrate::new()))
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn folders(&self) -> &Folders {
        &self.folders
    }

    /// Returns the run counters.
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Opens a fresh context for a run and resolves its domain count.
    async fn begin(&self, phase: RunPhase) -> Result<StageEnv, RunError> {
        let ctx = ExecContext::new(Arc::clone(&self.substrate));

        let root = self.folders.root();
        if !ctx.exists(root).await {
            ctx.result()?;
            return Err(RunError::staging(format!("directory not found: `{}`", root)));
        }

        let namelists = Location::new(root.host(), &self.config.folders.namelists_dir);
        let domains = resolve_domain_count(&ctx, &namelists, phase).await?;

        Ok(StageEnv::new(
            ctx,
            Arc::clone(&self.config),
            self.folders.clone(),
            domains,
        ))
    }

    /// Executes every stage of `run` selected by its phase.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded by any stage.
    pub async fn run(&self, run: &ForecastRun) -> Result<(), RunError> {
        let started_at = Instant::now();
        let date = format_compact_date(&run.start);
        self.started.fetch_add(1, Ordering::Relaxed);

        info!(
            date = %date,
            hours = run.duration_hours(),
            phase = %run.phase,
            dataset = %run.dataset,
            "Starting run"
        );

        let result = self.execute(run).await;
        match &result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    date = %date,
                    elapsed_secs = started_at.elapsed().as_secs(),
                    "Run completed"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(date = %date, error = %e, "Run failed");
            }
        }
        result
    }

    async fn execute(&self, run: &ForecastRun) -> Result<(), RunError> {
        let env = self.begin(run.phase).await?;
        info!(domains = env.domains, "Resolved domain count");

        workdir::prepare_date_workdir(&env, run).await;

        if run.phase.includes_preprocessing() {
            wps::preprocess(&env, run).await;
        }

        if run.phase.includes_assimilation() {
            for cycle in Cycle::ALL {
                da::build_da_dirs(&env, run, cycle).await;
                da::run_da(&env, run, cycle).await;
                wrf::build_wrf_dir(&env, run, cycle).await;
                wrf::run_wrf(&env, run, cycle).await;
                if env.ctx.is_failed() {
                    break;
                }
                info!(cycle = %cycle, "Cycle completed");
            }
        }

        env.ctx.result()
    }

    /// Executes runs one date at a time.
    ///
    /// The batch stops at the first failing run; later dates are not
    /// attempted.
    pub async fn run_batch(&self, runs: &[ForecastRun]) -> Result<(), RunError> {
        info!(runs = runs.len(), "Starting batch");
        for (i, run) in runs.iter().enumerate() {
            if let Err(e) = self.run(run).await {
                let skipped = runs.len() - i - 1;
                if skipped > 0 {
                    warn!(skipped, "Aborting batch after failed run");
                }
                return Err(e);
            }
        }
        info!(runs = runs.len(), "Batch completed");
        Ok(())
    }

    /// Executes a single step of one cycle.
    ///
    /// The domain count is read from the step template, as for runs that
    /// only assimilate.
    pub async fn run_step(
        &self,
        run: &ForecastRun,
        cycle: Cycle,
        kind: StepKind,
    ) -> Result<(), RunError> {
        info!(
            date = %format_compact_date(&run.start),
            cycle = %cycle,
            step = %kind,
            "Running single step"
        );
        let env = self.begin(RunPhase::AssimilateOnly).await?;

        match kind {
            StepKind::BuildDa => da::build_da_dirs(&env, run, cycle).await,
            StepKind::RunDa => da::run_da(&env, run, cycle).await,
            StepKind::BuildWrf => wrf::build_wrf_dir(&env, run, cycle).await,
            StepKind::RunWrf => wrf::run_wrf(&env, run, cycle).await,
        }

        env.ctx.result()
    }

    /// Removes the date directory of the run starting at `start`.
    ///
    /// A missing directory is not an error.
    pub async fn remove_run_folder(&self, start: &DateTime<Utc>) -> Result<(), RunError> {
        let ctx = ExecContext::new(Arc::clone(&self.substrate));
        let workdir = self.folders.workdir_for_date(start);
        if ctx.exists(&workdir).await {
            info!(workdir = %workdir, "Removing run folder");
            ctx.remove_dir(&workdir).await;
        }
        ctx.result()
    }
}
