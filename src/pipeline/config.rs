//! Configuration for the forecast pipeline.
//!
//! The configuration is a TOML file declaring the static program
//! directories, archives and namelist templates used to build a run, the
//! process counts used to launch each binary, environment overrides passed
//! to every spawned process, and a few run-level parameters.
//!
//! ```toml
//! [folders]
//! geodata_dir = "geodata"
//! covar_matrixes_dir = "matrix"
//! wps_prg = "WPS"
//! wrfda_prg = "WRFDA"
//! wrf_main_run_prg = "WRF-run"
//! wrf_ass_step_prg = "WRF-step"
//! gfs_archive = "/archive/gfs"
//! observations_archive = "/archive/obs"
//! namelists_dir = "namelists"
//!
//! [procs]
//! geogrid = 16
//! metgrid = 16
//! real = 16
//! wrfda = 64
//! wrfstep = 64
//!
//! [env]
//! I_MPI_HYDRA_HOSTS_GROUP = "node01,node02"
//!
//! [run]
//! forecast_hours = 48
//! radar_primary = "per-domain"
//! ```
//!
//! Relative folder paths are resolved against the directory containing the
//! configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::error::RunError;
use crate::execution::DEFAULT_HOST;
use crate::folders::RadarNaming;

/// Environment override listing the compute hosts of a run.
pub const HOSTS_ENV_VAR: &str = "I_MPI_HYDRA_HOSTS_GROUP";

/// Errors that can occur while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or misses required fields.
    #[error("cannot parse configuration: {0}")]
    Parse(String),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::config(err.to_string())
    }
}

/// Paths of every directory the pipeline reads from.
#[derive(Debug, Clone, Deserialize)]
pub struct FoldersConf {
    /// Static geographical data used by geogrid.
    #[serde(alias = "GeodataDir")]
    pub geodata_dir: PathBuf,
    /// Background error covariance matrices, one subdirectory per season.
    #[serde(alias = "CovarMatrixesDir")]
    pub covar_matrixes_dir: PathBuf,
    /// WPS build directory.
    #[serde(alias = "WPSPrg")]
    pub wps_prg: PathBuf,
    /// WRFDA build directory.
    #[serde(alias = "WRFDAPrg")]
    pub wrfda_prg: PathBuf,
    /// WRF build used for the final forecast run.
    #[serde(alias = "WRFMainRunPrg")]
    pub wrf_main_run_prg: PathBuf,
    /// WRF build used for the assimilation step runs (and real.exe).
    #[serde(alias = "WRFAssStepPrg")]
    pub wrf_ass_step_prg: PathBuf,
    /// Archive of global model input data.
    #[serde(alias = "GFSArchive")]
    pub gfs_archive: PathBuf,
    /// Archive of radar and weather station observations.
    #[serde(alias = "ObservationsArchive")]
    pub observations_archive: PathBuf,
    /// Namelist templates.
    #[serde(alias = "NamelistsDir")]
    pub namelists_dir: PathBuf,
}

impl FoldersConf {
    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.geodata_dir,
            &mut self.covar_matrixes_dir,
            &mut self.wps_prg,
            &mut self.wrfda_prg,
            &mut self.wrf_main_run_prg,
            &mut self.wrf_ass_step_prg,
            &mut self.gfs_archive,
            &mut self.observations_archive,
            &mut self.namelists_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Number of MPI processes used to launch each binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcsConf {
    #[serde(alias = "GeogridProcCount", default = "one", deserialize_with = "process_count")]
    pub geogrid: u32,
    #[serde(alias = "MetgridProcCount", default = "one", deserialize_with = "process_count")]
    pub metgrid: u32,
    #[serde(alias = "WrfstepProcCount", default = "one", deserialize_with = "process_count")]
    pub wrfstep: u32,
    #[serde(alias = "WrfdaProcCount", default = "one", deserialize_with = "process_count")]
    pub wrfda: u32,
    #[serde(alias = "RealProcCount", default = "one", deserialize_with = "process_count")]
    pub real: u32,
}

impl Default for ProcsConf {
    fn default() -> Self {
        Self {
            geogrid: 1,
            metgrid: 1,
            wrfstep: 1,
            wrfda: 1,
            real: 1,
        }
    }
}

fn one() -> u32 {
    1
}

/// Accepts process counts written either as integers or as strings.
fn process_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Run-level parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Forecast length used when a run has no explicit end date.
    pub forecast_hours: u32,
    /// Radar archive naming tried first; the other one is the fallback.
    pub radar_primary: RadarNaming,
    /// Workers of the bulk input copy pool.
    pub copy_workers: usize,
    /// Upper bound of concurrent per-domain tasks in a fan-out.
    pub max_parallel_domains: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            forecast_hours: 48,
            radar_primary: RadarNaming::PerDomain,
            copy_workers: 10,
            max_parallel_domains: 8,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(alias = "Folders")]
    pub folders: FoldersConf,
    #[serde(alias = "Procs", default)]
    pub procs: ProcsConf,
    /// Environment variables passed to every spawned process.
    #[serde(alias = "Env", default)]
    pub env: BTreeMap<String, String>,
    #[serde(alias = "Run", default)]
    pub run: RunSettings,
}

impl Configuration {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.folders.resolve_relative_to(base);
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses a configuration from TOML text without resolving paths.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let procs = [
            ("procs.geogrid", self.procs.geogrid),
            ("procs.metgrid", self.procs.metgrid),
            ("procs.wrfstep", self.procs.wrfstep),
            ("procs.wrfda", self.procs.wrfda),
            ("procs.real", self.procs.real),
        ];
        for (key, count) in procs {
            if count == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    key
                )));
            }
        }

        if self.run.forecast_hours == 0 {
            return Err(ConfigError::ValidationFailed(
                "run.forecast_hours must be greater than 0".to_string(),
            ));
        }

        if self.run.copy_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "run.copy_workers must be greater than 0".to_string(),
            ));
        }

        if self.run.max_parallel_domains == 0 {
            return Err(ConfigError::ValidationFailed(
                "run.max_parallel_domains must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Environment overrides as key/value pairs.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Compute hosts of a run; the first one is the main host.
    pub fn hosts(&self) -> Vec<String> {
        let hosts: Vec<String> = self
            .env
            .get(HOSTS_ENV_VAR)
            .map(|group| {
                group
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if hosts.is_empty() {
            vec![DEFAULT_HOST.to_string()]
        } else {
            hosts
        }
    }

    /// Host where stage directories are built and binaries are launched.
    pub fn main_host(&self) -> String {
        self.hosts().remove(0)
    }

    /// Builder method to set the default forecast length.
    pub fn with_forecast_hours(mut self, hours: u32) -> Self {
        self.run.forecast_hours = hours;
        self
    }

    /// Builder method to set the primary radar archive naming.
    pub fn with_radar_primary(mut self, naming: RadarNaming) -> Self {
        self.run.radar_primary = naming;
        self
    }

    /// Builder method to set the bulk copy pool size.
    pub fn with_copy_workers(mut self, workers: usize) -> Self {
        self.run.copy_workers = workers;
        self
    }

    /// Builder method to set the per-domain concurrency bound.
    pub fn with_max_parallel_domains(mut self, max: usize) -> Self {
        self.run.max_parallel_domains = max;
        self
    }

    /// Builder method to add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[folders]
geodata_dir = "geodata"
covar_matrixes_dir = "matrix"
wps_prg = "/opt/WPS"
wrfda_prg = "/opt/WRFDA"
wrf_main_run_prg = "/opt/WRF-run"
wrf_ass_step_prg = "/opt/WRF-step"
gfs_archive = "archive/gfs"
observations_archive = "archive/obs"
namelists_dir = "namelists"
"#;

    #[test]
    fn test_defaults() {
        let config = Configuration::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.procs.wrfda, 1);
        assert_eq!(config.run.forecast_hours, 48);
        assert_eq!(config.run.radar_primary, RadarNaming::PerDomain);
        assert_eq!(config.run.copy_workers, 10);
        assert!(config.env.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wrfda-runner.cfg");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Configuration::load(&path).unwrap();
        assert_eq!(config.folders.geodata_dir, tmp.path().join("geodata"));
        assert_eq!(config.folders.namelists_dir, tmp.path().join("namelists"));
        assert_eq!(config.folders.gfs_archive, tmp.path().join("archive/gfs"));
        assert_eq!(config.folders.wps_prg, PathBuf::from("/opt/WPS"));
    }

    #[test]
    fn test_legacy_keys_and_string_counts() {
        let content = r#"
[Folders]
GeodataDir = "/data/geog"
CovarMatrixesDir = "/data/be"
WPSPrg = "/opt/WPS"
WRFDAPrg = "/opt/WRFDA"
WRFMainRunPrg = "/opt/WRF-run"
WRFAssStepPrg = "/opt/WRF-step"
GFSArchive = "/archive/gfs"
ObservationsArchive = "/archive/obs"
NamelistsDir = "/data/namelists"

[Procs]
GeogridProcCount = "16"
MetgridProcCount = "16"
WrfstepProcCount = "84"
WrfdaProcCount = "50"
RealProcCount = 36

[Env]
OMP_NUM_THREADS = "1"
"#;
        let config = Configuration::from_toml_str(content).unwrap();
        assert_eq!(config.procs.wrfstep, 84);
        assert_eq!(config.procs.real, 36);
        assert_eq!(config.folders.wrfda_prg, PathBuf::from("/opt/WRFDA"));
        assert_eq!(
            config.env_vars(),
            vec![("OMP_NUM_THREADS".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_run_settings() {
        let content = format!(
            "{}\n[run]\nforecast_hours = 42\nradar_primary = \"legacy\"\ncopy_workers = 20\n",
            MINIMAL
        );
        let config = Configuration::from_toml_str(&content).unwrap();
        assert_eq!(config.run.forecast_hours, 42);
        assert_eq!(config.run.radar_primary, RadarNaming::Legacy);
        assert_eq!(config.run.copy_workers, 20);
        assert_eq!(config.run.max_parallel_domains, 8);
    }

    #[test]
    fn test_hosts() {
        let config = Configuration::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.hosts(), vec!["localhost"]);
        assert_eq!(config.main_host(), "localhost");

        let config = config.with_env(HOSTS_ENV_VAR, "node01, node02,,node03");
        assert_eq!(config.hosts(), vec!["node01", "node02", "node03"]);
        assert_eq!(config.main_host(), "node01");
    }

    #[test]
    fn test_validation() {
        let config = Configuration::from_toml_str(MINIMAL).unwrap();
        let err = config.clone().with_copy_workers(0).validate().unwrap_err();
        assert!(err.to_string().contains("copy_workers"));

        let err = config.clone().with_forecast_hours(0).validate().unwrap_err();
        assert!(err.to_string().contains("forecast_hours"));

        let mut zero_procs = config;
        zero_procs.procs.wrfda = 0;
        let err = zero_procs.validate().unwrap_err();
        assert!(err.to_string().contains("procs.wrfda"));
    }

    #[test]
    fn test_missing_file() {
        let err = Configuration::load("/nonexistent/wrfda-runner.cfg").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        let run_err: RunError = err.into();
        assert_eq!(run_err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_missing_folder_is_parse_error() {
        let err = Configuration::from_toml_str("[folders]\ngeodata_dir = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
