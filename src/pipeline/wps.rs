//! WPS preprocessing and real.
//!
//! WPS runs once per date in `wps/`. Real then runs there once per cycle,
//! each time with a namelist starting at the cycle's instant, and stages its
//! outputs into `inputs/<YYYYMMDD>/` where the DA builders pick them up.

use chrono::Duration;
use tracing::info;

use super::stage::StageEnv;
use super::types::{Cycle, ForecastRun, WPS_LEAD_HOURS};
use crate::namelist::{self, NamelistArgs};

/// Runs longer than this also average the surface temperature.
const AVG_TSFC_MIN_HOURS: i64 = 24;

/// Builds the `wps/` directory of `run`.
pub async fn build_wps_dir(env: &StageEnv, run: &ForecastRun) {
    let ctx = &env.ctx;
    let wps_dir = env.folders.wps_dir(&run.start);
    if !env.ensure_absent(std::slice::from_ref(&wps_dir), "WPS").await {
        return;
    }

    info!(workdir = %wps_dir, dataset = %run.dataset, "Building WPS directory");
    ctx.mkdir(&wps_dir).await;

    let args = NamelistArgs::new(run.start - Duration::hours(WPS_LEAD_HOURS), run.end);
    namelist::render(
        ctx,
        &env.namelists_dir(),
        "namelist.wps",
        &wps_dir.join("namelist.wps"),
        &args,
    )
    .await;

    let wps_prg = env.static_dir(&env.config.folders.wps_prg);
    let step_prg = env.static_dir(&env.config.folders.wrf_ass_step_prg);

    for (src, name) in [
        ("geogrid.exe", "geogrid.exe"),
        ("link_grib.csh", "link_grib.csh"),
        ("ungrib.exe", "ungrib.exe"),
        ("metgrid.exe", "metgrid.exe"),
        ("util/avg_tsfc.exe", "avg_tsfc.exe"),
    ] {
        ctx.link(&wps_prg.join(src), &wps_dir.join(name)).await;
    }
    ctx.link(&step_prg.join("run/real.exe"), &wps_dir.join("real.exe"))
        .await;

    let vtable = wps_prg
        .join("ungrib/Variable_Tables")
        .join(run.dataset.vtable());
    ctx.link(&vtable, &wps_dir.join("Vtable")).await;
}

/// Runs geogrid, ungrib and metgrid in `wps/`.
pub async fn run_wps(env: &StageEnv, run: &ForecastRun) {
    if env.ctx.is_failed() {
        return;
    }

    let wps_dir = env.folders.wps_dir(&run.start);
    let procs = &env.config.procs;
    info!(workdir = %wps_dir, "Running WPS");

    env.mpirun(&wps_dir, procs.geogrid, "./geogrid.exe", "geogrid.log.0000")
        .await;
    // no shell runs the command, so the grib list is expanded here
    let gribs: Vec<String> = env
        .ctx
        .list_dir(&env.folders.gfs_dir(&run.start))
        .await
        .iter()
        .filter_map(|entry| entry.file_name())
        .map(|name| format!("../gfs/{}", name))
        .collect();
    env.exec(&wps_dir, "./link_grib.csh", &gribs).await;
    env.exec(&wps_dir, "./ungrib.exe", &[]).await;
    if run.duration_hours() > AVG_TSFC_MIN_HOURS {
        env.exec(&wps_dir, "./avg_tsfc.exe", &[]).await;
    }
    env.mpirun(&wps_dir, procs.metgrid, "./metgrid.exe", "metgrid.log.0000")
        .await;
}

/// Renders the real namelist of `cycle` into `wps/namelist.input`.
pub async fn build_real_namelist(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    let wps_dir = env.folders.wps_dir(&run.start);
    let args = NamelistArgs::new(cycle.instant(&run.start), run.end);
    namelist::render(
        &env.ctx,
        &env.namelists_dir(),
        "namelist.real",
        &wps_dir.join("namelist.input"),
        &args,
    )
    .await;
}

/// Runs real for `cycle` and stages its outputs into `inputs/`.
///
/// Every cycle stages its boundary file; the first cycle also stages the
/// initial condition of every domain.
pub async fn run_real(env: &StageEnv, run: &ForecastRun, cycle: Cycle) {
    if env.ctx.is_failed() {
        return;
    }

    let ctx = &env.ctx;
    let wps_dir = env.folders.wps_dir(&run.start);
    info!(cycle = %cycle, workdir = %wps_dir, "Running real");

    env.mpirun(&wps_dir, env.config.procs.real, "./real.exe", "rsl.out.0000")
        .await;

    ctx.mkdir(&env.folders.inputs_dir(&run.start)).await;
    ctx.copy(
        &wps_dir.join("wrfbdy_d01"),
        &env.folders.staged_boundary(&run.start, cycle),
    )
    .await;

    if cycle.previous().is_some() {
        return;
    }

    for domain in env.domain_numbers() {
        ctx.copy(
            &wps_dir.join(format!("wrfinput_d{:02}", domain)),
            &env.folders.staged_initial_condition(&run.start, domain),
        )
        .await;
    }
}

/// Builds and runs WPS, then real for every cycle.
pub async fn preprocess(env: &StageEnv, run: &ForecastRun) {
    build_wps_dir(env, run).await;
    run_wps(env, run).await;
    for cycle in Cycle::ALL {
        build_real_namelist(env, run, cycle).await;
        run_real(env, run, cycle).await;
    }
}
