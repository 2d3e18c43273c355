//! Date working directory preparation.
//!
//! Before any stage runs, the date directory `<root>/<YYYYMMDD>` must exist
//! on every host of the run with links to the static program directories.
//! The main host additionally receives the global model input files (for
//! runs that preprocess) and the observation files of the three cycles (for
//! runs that assimilate).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::stage::{fan_out, StageEnv};
use super::types::{Cycle, ForecastRun};
use crate::error::RunError;
use crate::execution::Location;
use crate::folders::RadarNaming;

/// Prepares the date directory of `run` on every host.
pub async fn prepare_date_workdir(env: &StageEnv, run: &ForecastRun) {
    if env.ctx.is_failed() {
        return;
    }

    // the main skeleton exists before any other host looks for its own
    let mut hosts = env.config.hosts().into_iter();
    if let Some(main) = hosts.next() {
        build_skeleton(env, main, &run.start).await;
    }
    let others: Vec<String> = hosts.collect();
    fan_out(others.len(), others, move |host| {
        build_skeleton(env, host, &run.start)
    })
    .await;

    env.ctx.mkdir(&env.folders.gfs_dir(&run.start)).await;
    env.ctx.mkdir(&env.folders.observations_dir(&run.start)).await;

    if run.phase.includes_preprocessing() {
        copy_gfs_inputs(env, &run.start).await;
    }

    if run.phase.includes_assimilation() {
        fan_out(Cycle::ALL.len(), Cycle::ALL, move |cycle| {
            copy_observations(env, &run.start, cycle)
        })
        .await;
    }
}

/// Creates the date directory on `host` unless it is already there.
async fn build_skeleton(env: &StageEnv, host: String, start: &DateTime<Utc>) {
    let workdir = env.folders.workdir_for_date(start).on_host(host.as_str());
    if env.ctx.exists(&workdir).await {
        debug!(workdir = %workdir, "Date directory already present");
        return;
    }

    info!(workdir = %workdir, "Creating date directory");
    env.ctx.mkdir(&workdir).await;

    let folders = &env.config.folders;
    let links = [
        (&folders.geodata_dir, "geodata"),
        (&folders.wps_prg, "wpsprg"),
        (&folders.wrfda_prg, "wrfdaprg"),
        (&folders.wrf_main_run_prg, "wrfprgrun"),
        (&folders.wrf_ass_step_prg, "wrfprgstep"),
    ];
    for (target, name) in links {
        env.ctx
            .link(&workdir.with_path(target), &workdir.join(name))
            .await;
    }
}

/// Copies every regular file of the run's archive directory into `gfs/`
/// with a fixed pool of copy workers.
pub async fn copy_gfs_inputs(env: &StageEnv, start: &DateTime<Utc>) {
    let sources = env.folders.gfs_sources(start);
    let gfs_dir = env.folders.gfs_dir(start);
    let workers = env.config.run.copy_workers.max(1);

    info!(sources = %sources, workers, "Copying global model input files");

    let (tx, rx) = mpsc::channel::<Location>(workers);
    let rx = Arc::new(Mutex::new(rx));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let rx = Arc::clone(&rx);
            let ctx = env.ctx.clone();
            let gfs_dir = gfs_dir.clone();
            tokio::spawn(async move {
                let mut copied = 0usize;
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(src) = next else {
                        break;
                    };
                    if let Some(name) = src.file_name() {
                        ctx.copy(&src, &gfs_dir.join(name)).await;
                        copied += 1;
                    }
                }
                copied
            })
        })
        .collect();

    for entry in env.ctx.list_dir(&sources).await {
        if !env.ctx.is_file(&entry).await {
            continue;
        }
        if tx.send(entry).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut total = 0;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(copied) => total += copied,
            Err(e) => {
                env.ctx
                    .fail(RunError::staging(format!("copy worker failed: {}", e)));
            }
        }
    }

    if !env.ctx.is_failed() {
        info!(files = total, "Global model input files copied");
    }
}

/// Copies the radar and station observations of `cycle` found in the
/// archive into the date directory.
///
/// Radar files are copied under both naming conventions where present;
/// picking one is left to the DA builder.
pub async fn copy_observations(env: &StageEnv, start: &DateTime<Utc>, cycle: Cycle) {
    let folders = &env.folders;

    let mut radar = Vec::new();
    for domain in env.domain_numbers() {
        radar.push((
            folders.radar_archive(start, domain, cycle, RadarNaming::PerDomain),
            folders.radar_observation(start, domain, cycle, RadarNaming::PerDomain),
        ));
    }
    radar.push((
        folders.radar_archive(start, 1, cycle, RadarNaming::Legacy),
        folders.radar_observation(start, 1, cycle, RadarNaming::Legacy),
    ));

    for (src, dst) in radar {
        if env.ctx.exists(&src).await {
            debug!(cycle = %cycle, src = %src, "Copying radar observations");
            env.ctx.copy(&src, &dst).await;
        }
    }

    let stations = folders.stations_archive(start, cycle);
    if env.ctx.exists(&stations).await {
        debug!(cycle = %cycle, src = %stations, "Copying station observations");
        env.ctx
            .copy(&stations, &folders.stations_observation(start, cycle))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecContext, LocalSubstrate};
    use crate::folders::Folders;
    use crate::pipeline::config::{Configuration, HOSTS_ENV_VAR};
    use crate::pipeline::types::{InputDataset, RunPhase};
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(base: &Path) -> Configuration {
        let toml = format!(
            r#"
[folders]
geodata_dir = "{0}/geodata"
covar_matrixes_dir = "{0}/be"
wps_prg = "{0}/WPS"
wrfda_prg = "{0}/WRFDA"
wrf_main_run_prg = "{0}/WRF-run"
wrf_ass_step_prg = "{0}/WRF-step"
gfs_archive = "{0}/gfs-archive"
observations_archive = "{0}/obs-archive"
namelists_dir = "{0}/namelists"

[run]
copy_workers = 3
"#,
            base.display()
        );
        Configuration::from_toml_str(&toml).unwrap()
    }

    fn env(base: &Path, config: Configuration, domains: u32) -> StageEnv {
        let folders = Folders::new(Location::local(base.join("runs")), &config.folders);
        StageEnv::new(
            ExecContext::new(Arc::new(LocalSubstrate::new())),
            Arc::new(config),
            folders,
            domains,
        )
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 7, 15, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_copies_inputs() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        let archive = base.join("gfs-archive/2020/07/15/0600");
        std::fs::create_dir_all(archive.join("nested")).unwrap();
        for hour in 0..7 {
            std::fs::write(archive.join(format!("gfs.t06z.pgrb2.0p25.f{:03}", hour)), "grib").unwrap();
        }
        let obs = base.join("obs-archive");
        std::fs::create_dir_all(&obs).unwrap();
        std::fs::write(obs.join("ob.radar.2020071506_dom01"), "r").unwrap();
        std::fs::write(obs.join("ob.radar.2020071509"), "r").unwrap();
        std::fs::write(obs.join("ob.ascii.2020071512"), "s").unwrap();

        let env = env(base, config(base), 2);
        let run = ForecastRun::with_hours(
            start(),
            48,
            RunPhase::PreprocessThenAssimilate,
            InputDataset::Gfs,
        )
        .unwrap();
        std::fs::create_dir_all(base.join("runs")).unwrap();

        prepare_date_workdir(&env, &run).await;
        assert!(env.ctx.result().is_ok(), "{:?}", env.ctx.error());

        let day = base.join("runs/20200715");
        for link in ["geodata", "wpsprg", "wrfdaprg", "wrfprgrun", "wrfprgstep"] {
            assert!(day.join(link).symlink_metadata().is_ok(), "missing {}", link);
        }
        let gfs: Vec<_> = std::fs::read_dir(day.join("gfs")).unwrap().collect();
        assert_eq!(gfs.len(), 7);
        assert!(day.join("observations/ob.radar.2020071506_dom01").exists());
        assert!(day.join("observations/ob.radar.2020071509").exists());
        assert!(day.join("observations/ob.ascii.2020071512").exists());
        assert!(!day.join("observations/ob.ascii.2020071506").exists());
    }

    #[tokio::test]
    async fn test_prepare_reuses_existing_date_directory() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        std::fs::create_dir_all(base.join("runs/20200715")).unwrap();
        let config = config(base).with_env(HOSTS_ENV_VAR, "node01,node02");

        let env = env(base, config, 1);
        let run = ForecastRun::with_hours(start(), 48, RunPhase::AssimilateOnly, InputDataset::Gfs)
            .unwrap();

        prepare_date_workdir(&env, &run).await;
        assert!(env.ctx.result().is_ok(), "{:?}", env.ctx.error());
        assert!(base.join("runs/20200715/observations").is_dir());
        assert!(!base.join("runs/20200715/geodata").exists());
    }

    #[tokio::test]
    async fn test_prepare_on_hosts_sharing_a_filesystem() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        let config = config(base).with_env(HOSTS_ENV_VAR, "node01,node02,node03");
        let env = env(base, config, 1);
        let run = ForecastRun::with_hours(start(), 48, RunPhase::AssimilateOnly, InputDataset::Gfs)
            .unwrap();

        prepare_date_workdir(&env, &run).await;
        assert!(env.ctx.result().is_ok(), "{:?}", env.ctx.error());

        let day = base.join("runs/20200715");
        let geodata = std::fs::read_link(day.join("geodata")).unwrap();
        assert_eq!(geodata, base.join("geodata"));
        assert!(day.join("observations").is_dir());
    }

    #[tokio::test]
    async fn test_missing_gfs_archive_is_staging_error() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        let env = env(base, config(base), 1);

        copy_gfs_inputs(&env, &start()).await;
        assert_eq!(
            env.ctx.error().map(RunError::kind),
            Some(crate::error::ErrorKind::Staging)
        );
    }
}
