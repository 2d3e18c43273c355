//! WRFDA assimilation directories.
//!
//! Each cycle assimilates every domain in its own `da{HH}_d{DD}/`
//! directory. Domains are independent of each other and are built and run
//! concurrently; domain 1 owns the boundary file and updates it after the
//! analysis.

use tracing::info;

use super::stage::StageEnv;
use super::types::{Cycle, ForecastRun};
use crate::error::RunError;
use crate::namelist::{self, NamelistArgs};

/// Binaries and tables linked from the WRFDA build.
const WRFDA_LINKS: [(&str, &str); 4] = [
    ("var/build/da_wrfvar.exe", "da_wrfvar.exe"),
    ("var/build/da_update_bc.exe", "da_update_bc.exe"),
    ("var/run/VARBC.in", "VARBC.in"),
    ("run/LANDUSE.TBL", "LANDUSE.TBL"),
];

/// Builds the DA directories of every domain for `cycle`.
///
/// Fails with a conflict before touching anything if any of them exists.
pub async fn build_da_dirs(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    let dirs: Vec<_> = env
        .domain_numbers()
        .map(|domain| env.folders.da_dir(&run.start, domain, cycle))
        .collect();
    let stage = format!("DA cycle {}", cycle);
    if !env.ensure_absent(&dirs, &stage).await {
        return;
    }

    info!(cycle = %cycle, domains = env.domains, "Building DA directories");
    env.for_each_domain(move |domain| build_da_dir(env, run, domain, cycle))
        .await;
}

/// Builds the DA directory of one domain.
pub async fn build_da_dir(env: &StageEnv, run: &ForecastRun, domain: u32, cycle: Cycle) {
    if env.ctx.is_failed() {
        return;
    }

    let ctx = &env.ctx;
    let folders = &env.folders;
    let start = &run.start;
    let da_dir = folders.da_dir(start, domain, cycle);

    ctx.mkdir(&da_dir).await;

    if domain == 1 {
        ctx.copy(
            &folders.staged_boundary(start, cycle),
            &folders.da_boundary(start, cycle),
        )
        .await;
    }
    ctx.copy(
        &folders.first_guess_source(start, domain, cycle),
        &folders.first_guess(start, domain, cycle),
    )
    .await;

    let namelists = env.namelists_dir();
    namelist::render(
        ctx,
        &namelists,
        &format!("namelist.d{:02}.wrfda", domain),
        &da_dir.join("namelist.input"),
        &NamelistArgs::new(cycle.instant(start), run.end),
    )
    .await;
    namelist::render(
        ctx,
        &namelists,
        "parame.in",
        &da_dir.join("parame.in"),
        &NamelistArgs::new(*start, run.end),
    )
    .await;

    let wrfda_prg = env.static_dir(&env.config.folders.wrfda_prg);
    for (src, name) in WRFDA_LINKS {
        ctx.link(&wrfda_prg.join(src), &da_dir.join(name)).await;
    }

    let covariance = env
        .static_dir(&env.config.folders.covar_matrixes_dir)
        .join(run.season().as_str())
        .join(format!("be_d{:02}", domain));
    ctx.link(&covariance, &da_dir.join("be.dat")).await;

    link_radar(env, run, domain, cycle).await;

    let stations = folders.stations_observation(start, cycle);
    if ctx.exists(&stations).await {
        ctx.link(&stations, &da_dir.join("ob.ascii")).await;
    }
}

/// Links the radar observation of the domain, trying the primary naming
/// before the fallback one.
async fn link_radar(env: &StageEnv, run: &ForecastRun, domain: u32, cycle: Cycle) {
    let ctx = &env.ctx;
    let primary = env.config.run.radar_primary;
    let target = env.folders.da_dir(&run.start, domain, cycle).join("ob.radar");

    let candidates = [primary, primary.fallback()].map(|naming| {
        env.folders
            .radar_observation(&run.start, domain, cycle, naming)
    });
    for candidate in &candidates {
        if ctx.exists(candidate).await {
            ctx.link(candidate, &target).await;
            return;
        }
    }

    if !ctx.is_failed() {
        ctx.fail(RunError::staging(format!(
            "no radar observations for cycle {}, domain {}: neither `{}` nor `{}` exists",
            cycle, domain, candidates[0], candidates[1]
        )));
    }
}

/// Runs the assimilation of every domain for `cycle`.
pub async fn run_da(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    if env.ctx.is_failed() {
        return;
    }

    info!(cycle = %cycle, domains = env.domains, "Running DA");
    env.for_each_domain(move |domain| run_da_domain(env, run, domain, cycle))
        .await;
}

/// Runs the analysis of one domain, then the boundary update for domain 1.
pub async fn run_da_domain(env: &StageEnv, run: &ForecastRun, domain: u32, cycle: Cycle) {
    let da_dir = env.folders.da_dir(&run.start, domain, cycle);

    env.mpirun(&da_dir, env.config.procs.wrfda, "./da_wrfvar.exe", "rsl.out.0000")
        .await;

    if domain == 1 {
        env.exec(&da_dir, "./da_update_bc.exe", &[]).await;
    }
}
