//! WRF forecast directories.
//!
//! After each cycle's analysis, WRF runs in `wrf{HH}/` from the analyses of
//! every domain. The first two cycles run a short step with the step build;
//! the last one runs the full forecast with the main run build.

use tracing::info;

use super::stage::StageEnv;
use super::types::{Cycle, ForecastRun};
use crate::namelist::{self, NamelistArgs};

/// Static resources linked from the `run/` directory of a WRF build.
const WRF_RUN_RESOURCES: [&str; 9] = [
    "LANDUSE.TBL",
    "ozone_plev.formatted",
    "ozone_lat.formatted",
    "ozone.formatted",
    "RRTMG_LW_DATA",
    "RRTMG_SW_DATA",
    "VEGPARM.TBL",
    "SOILPARM.TBL",
    "GENPARM.TBL",
];

/// Namelist template used by the WRF run of `cycle`.
pub fn wrf_template(cycle: Cycle) -> &'static str {
    if cycle.is_main_run() {
        "namelist.run.wrf"
    } else {
        "namelist.step.wrf"
    }
}

/// Builds the WRF directory of `cycle`.
pub async fn build_wrf_dir(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    let ctx = &env.ctx;
    let folders = &env.folders;
    let start = &run.start;
    let wrf_dir = folders.wrf_dir(start, cycle);

    let stage = format!("WRF cycle {}", cycle);
    if !env.ensure_absent(std::slice::from_ref(&wrf_dir), &stage).await {
        return;
    }

    let template = wrf_template(cycle);
    info!(cycle = %cycle, workdir = %wrf_dir, template, "Building WRF directory");
    ctx.mkdir(&wrf_dir).await;

    ctx.copy(&folders.da_boundary(start, cycle), &wrf_dir.join("wrfbdy_d01"))
        .await;

    let (from, to) = cycle.wrf_window(start, &run.end);
    let namelists = env.namelists_dir();
    namelist::render(
        ctx,
        &namelists,
        template,
        &wrf_dir.join("namelist.input"),
        &NamelistArgs::new(from, to),
    )
    .await;
    ctx.copy(
        &namelists.join(format!("wrf_var.txt.wrf_{:02}", cycle.number())),
        &wrf_dir.join("wrf_var.txt"),
    )
    .await;

    let prg_path = if cycle.is_main_run() {
        &env.config.folders.wrf_main_run_prg
    } else {
        &env.config.folders.wrf_ass_step_prg
    };
    let wrf_prg = env.static_dir(prg_path);
    ctx.link(&wrf_prg.join("main/wrf.exe"), &wrf_dir.join("wrf.exe"))
        .await;
    for resource in WRF_RUN_RESOURCES {
        ctx.link(&wrf_prg.join("run").join(resource), &wrf_dir.join(resource))
            .await;
    }

    for domain in env.domain_numbers() {
        ctx.link(
            &folders.analysis_output(start, domain, cycle),
            &folders.wrf_initial_condition(start, domain, cycle),
        )
        .await;
    }
}

/// Runs WRF for `cycle`.
pub async fn run_wrf(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    if env.ctx.is_failed() {
        return;
    }

    let wrf_dir = env.folders.wrf_dir(&run.start, cycle);
    info!(cycle = %cycle, workdir = %wrf_dir, "Running WRF");
    env.mpirun(&wrf_dir, env.config.procs.wrfstep, "./wrf.exe", "rsl.out.0000")
        .await;
}
