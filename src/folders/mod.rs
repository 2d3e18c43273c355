//! Canonical locations of every directory and artifact of a run.
//!
//! All functions are pure: they compute where things live, they never touch
//! the filesystem. Stage directories are named after the hour of their
//! cycle's assimilation instant (`wrf09`, `da09_d01`), inside a date
//! directory named after the run start (`<root>/20200715`).

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::execution::Location;
use crate::pipeline::config::FoldersConf;
use crate::pipeline::types::{Cycle, WPS_LEAD_HOURS};

/// Naming convention of radar observation files in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadarNaming {
    /// `ob.radar.YYYYMMDDHH_domDD`
    PerDomain,
    /// `ob.radar.YYYYMMDDHH`
    Legacy,
}

impl RadarNaming {
    /// The naming tried when this one does not resolve.
    pub fn fallback(&self) -> Self {
        match self {
            Self::PerDomain => Self::Legacy,
            Self::Legacy => Self::PerDomain,
        }
    }

    /// File name of the radar observation of `domain` at `instant`.
    pub fn file_name(&self, instant: &DateTime<Utc>, domain: u32) -> String {
        match self {
            Self::PerDomain => format!("ob.radar.{}_dom{:02}", hour_stamp(instant), domain),
            Self::Legacy => format!("ob.radar.{}", hour_stamp(instant)),
        }
    }
}

fn hour_stamp(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d%H").to_string()
}

fn day_stamp(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d").to_string()
}

/// Location naming rooted at a run tree.
#[derive(Debug, Clone)]
pub struct Folders {
    root: Location,
    gfs_archive: Location,
    observations_archive: Location,
}

impl Folders {
    /// Creates the naming for the run tree at `root`.
    ///
    /// Archives are addressed on the same host as `root`.
    pub fn new(root: Location, conf: &FoldersConf) -> Self {
        let gfs_archive = root.with_path(&conf.gfs_archive);
        let observations_archive = root.with_path(&conf.observations_archive);
        Self {
            root,
            gfs_archive,
            observations_archive,
        }
    }

    /// Root of the run tree.
    pub fn root(&self) -> &Location {
        &self.root
    }

    /// `<root>/<YYYYMMDD>`
    pub fn workdir_for_date(&self, start: &DateTime<Utc>) -> Location {
        self.root.join(day_stamp(start))
    }

    pub fn wps_dir(&self, start: &DateTime<Utc>) -> Location {
        self.workdir_for_date(start).join("wps")
    }

    /// `wrf{HH}` where HH is the hour of the cycle's instant.
    pub fn wrf_dir(&self, start: &DateTime<Utc>, cycle: Cycle) -> Location {
        let instant = cycle.instant(start);
        self.workdir_for_date(start)
            .join(format!("wrf{}", instant.format("%H")))
    }

    /// `da{HH}_d{DD}` where HH is the hour of the cycle's instant.
    pub fn da_dir(&self, start: &DateTime<Utc>, domain: u32, cycle: Cycle) -> Location {
        let instant = cycle.instant(start);
        self.workdir_for_date(start)
            .join(format!("da{}_d{:02}", instant.format("%H"), domain))
    }

    /// `<root>/inputs/<YYYYMMDD>`, the handoff area between WPS and DA.
    pub fn inputs_dir(&self, start: &DateTime<Utc>) -> Location {
        self.root.join("inputs").join(day_stamp(start))
    }

    pub fn observations_dir(&self, start: &DateTime<Utc>) -> Location {
        self.workdir_for_date(start).join("observations")
    }

    pub fn gfs_dir(&self, start: &DateTime<Utc>) -> Location {
        self.workdir_for_date(start).join("gfs")
    }

    /// Boundary conditions produced by real for `cycle`.
    pub fn staged_boundary(&self, start: &DateTime<Utc>, cycle: Cycle) -> Location {
        self.inputs_dir(start)
            .join(format!("wrfbdy_d01_da{:02}", cycle.number()))
    }

    /// Initial conditions produced by real for the first cycle.
    pub fn staged_initial_condition(&self, start: &DateTime<Utc>, domain: u32) -> Location {
        self.inputs_dir(start).join(format!("wrfinput_d{:02}", domain))
    }

    /// Boundary file of the cycle, owned by the domain 1 DA directory.
    pub fn da_boundary(&self, start: &DateTime<Utc>, cycle: Cycle) -> Location {
        self.da_dir(start, 1, cycle).join("wrfbdy_d01")
    }

    /// Where the first guess of DA(cycle, domain) comes from.
    ///
    /// The first cycle starts from the staged initial condition; later
    /// cycles start from the previous cycle's WRF output.
    pub fn first_guess_source(&self, start: &DateTime<Utc>, domain: u32, cycle: Cycle) -> Location {
        match cycle.previous() {
            Some(previous) => self.handoff_file(start, domain, previous),
            None => self.staged_initial_condition(start, domain),
        }
    }

    pub fn first_guess(&self, start: &DateTime<Utc>, domain: u32, cycle: Cycle) -> Location {
        self.da_dir(start, domain, cycle).join("fg")
    }

    pub fn analysis_output(&self, start: &DateTime<Utc>, domain: u32, cycle: Cycle) -> Location {
        self.da_dir(start, domain, cycle).join("wrfvar_output")
    }

    /// WRF state written at the end of a step, seeding the next first guess.
    pub fn handoff_file(&self, start: &DateTime<Utc>, domain: u32, cycle: Cycle) -> Location {
        self.wrf_dir(start, cycle)
            .join(format!("wrfvar_input_d{:02}", domain))
    }

    pub fn wrf_initial_condition(
        &self,
        start: &DateTime<Utc>,
        domain: u32,
        cycle: Cycle,
    ) -> Location {
        self.wrf_dir(start, cycle)
            .join(format!("wrfinput_d{:02}", domain))
    }

    /// Archive directory holding the global model files of a run.
    pub fn gfs_sources(&self, start: &DateTime<Utc>) -> Location {
        let first = *start - Duration::hours(WPS_LEAD_HOURS);
        self.gfs_archive.join(first.format("%Y/%m/%d/%H%M").to_string())
    }

    pub fn radar_archive(
        &self,
        start: &DateTime<Utc>,
        domain: u32,
        cycle: Cycle,
        naming: RadarNaming,
    ) -> Location {
        self.observations_archive
            .join(naming.file_name(&cycle.instant(start), domain))
    }

    pub fn stations_archive(&self, start: &DateTime<Utc>, cycle: Cycle) -> Location {
        self.observations_archive
            .join(stations_file_name(&cycle.instant(start)))
    }

    /// Radar observation copied into the date workdir.
    pub fn radar_observation(
        &self,
        start: &DateTime<Utc>,
        domain: u32,
        cycle: Cycle,
        naming: RadarNaming,
    ) -> Location {
        self.observations_dir(start)
            .join(naming.file_name(&cycle.instant(start), domain))
    }

    /// Station observation copied into the date workdir.
    pub fn stations_observation(&self, start: &DateTime<Utc>, cycle: Cycle) -> Location {
        self.observations_dir(start)
            .join(stations_file_name(&cycle.instant(start)))
    }
}

fn stations_file_name(instant: &DateTime<Utc>) -> String {
    format!("ob.ascii.{}", hour_stamp(instant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn folders() -> Folders {
        let conf = FoldersConf {
            geodata_dir: PathBuf::from("/data/geog"),
            covar_matrixes_dir: PathBuf::from("/data/be"),
            wps_prg: PathBuf::from("/opt/WPS"),
            wrfda_prg: PathBuf::from("/opt/WRFDA"),
            wrf_main_run_prg: PathBuf::from("/opt/WRF-run"),
            wrf_ass_step_prg: PathBuf::from("/opt/WRF-step"),
            gfs_archive: PathBuf::from("/archive/gfs"),
            observations_archive: PathBuf::from("/archive/obs"),
            namelists_dir: PathBuf::from("/data/namelists"),
        };
        Folders::new(Location::new("node01", "/runs"), &conf)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 7, 15, 12, 0, 0).unwrap()
    }

    fn cycle(n: u8) -> Cycle {
        Cycle::new(n).unwrap()
    }

    fn path(loc: Location) -> String {
        loc.path().display().to_string()
    }

    #[test]
    fn test_stage_directories() {
        let f = folders();
        let start = start();
        assert_eq!(path(f.workdir_for_date(&start)), "/runs/20200715");
        assert_eq!(path(f.wps_dir(&start)), "/runs/20200715/wps");
        assert_eq!(path(f.wrf_dir(&start, cycle(1))), "/runs/20200715/wrf06");
        assert_eq!(path(f.wrf_dir(&start, cycle(3))), "/runs/20200715/wrf12");
        assert_eq!(path(f.da_dir(&start, 2, cycle(2))), "/runs/20200715/da09_d02");
        assert_eq!(path(f.inputs_dir(&start)), "/runs/inputs/20200715");
        assert_eq!(f.wps_dir(&start).host(), "node01");
    }

    #[test]
    fn test_cycle_one_crosses_midnight() {
        let f = folders();
        let start = Utc.with_ymd_and_hms(2020, 7, 15, 3, 0, 0).unwrap();
        // the date directory follows the start, the name follows the instant
        assert_eq!(path(f.da_dir(&start, 1, cycle(1))), "/runs/20200715/da21_d01");
        assert_eq!(
            path(f.stations_archive(&start, cycle(1))),
            "/archive/obs/ob.ascii.2020071421"
        );
    }

    #[test]
    fn test_first_guess_provenance() {
        let f = folders();
        let start = start();
        for domain in 1..=3 {
            assert_eq!(
                f.first_guess_source(&start, domain, cycle(1)),
                f.staged_initial_condition(&start, domain)
            );
            for c in [2, 3] {
                let prev = cycle(c - 1);
                assert_eq!(
                    f.first_guess_source(&start, domain, cycle(c)),
                    f.wrf_dir(&start, prev)
                        .join(format!("wrfvar_input_d{:02}", domain))
                );
            }
        }
        assert_eq!(
            path(f.first_guess_source(&start, 2, cycle(3))),
            "/runs/20200715/wrf09/wrfvar_input_d02"
        );
    }

    #[test]
    fn test_artifacts() {
        let f = folders();
        let start = start();
        assert_eq!(
            path(f.staged_boundary(&start, cycle(2))),
            "/runs/inputs/20200715/wrfbdy_d01_da02"
        );
        assert_eq!(
            path(f.da_boundary(&start, cycle(3))),
            "/runs/20200715/da12_d01/wrfbdy_d01"
        );
        assert_eq!(
            path(f.analysis_output(&start, 3, cycle(1))),
            "/runs/20200715/da06_d03/wrfvar_output"
        );
        assert_eq!(
            path(f.wrf_initial_condition(&start, 3, cycle(1))),
            "/runs/20200715/wrf06/wrfinput_d03"
        );
    }

    #[test]
    fn test_archives() {
        let f = folders();
        let start = start();
        assert_eq!(path(f.gfs_sources(&start)), "/archive/gfs/2020/07/15/0600");
        assert_eq!(f.gfs_sources(&start).host(), "node01");
        assert_eq!(
            path(f.radar_archive(&start, 2, cycle(2), RadarNaming::PerDomain)),
            "/archive/obs/ob.radar.2020071509_dom02"
        );
        assert_eq!(
            path(f.radar_archive(&start, 2, cycle(2), RadarNaming::Legacy)),
            "/archive/obs/ob.radar.2020071509"
        );
        assert_eq!(
            path(f.radar_observation(&start, 1, cycle(3), RadarNaming::PerDomain)),
            "/runs/20200715/observations/ob.radar.2020071512_dom01"
        );
        assert_eq!(
            path(f.stations_observation(&start, cycle(3))),
            "/runs/20200715/observations/ob.ascii.2020071512"
        );
    }

    #[test]
    fn test_radar_fallback() {
        assert_eq!(RadarNaming::PerDomain.fallback(), RadarNaming::Legacy);
        assert_eq!(RadarNaming::Legacy.fallback(), RadarNaming::PerDomain);
    }
}
