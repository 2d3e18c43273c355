//! Forecast pipeline orchestration.
//!
//! A forecast run goes through a preprocessing stage (WPS and real) and
//! three data assimilation cycles, each one an assimilation (DA) of every
//! domain followed by a WRF forecast:
//!
//! ```text
//! WPS → real ×3 → DA(1) → WRF(1) → DA(2) → WRF(2) → DA(3) → WRF(3)
//!                    │                 ▲ │                ▲
//!                    └ inputs/ (fg)    │ └ wrfvar_input ──┘
//!                                      └ wrfvar_input
//! ```
//!
//! # Components
//!
//! - **Orchestrator**: runs dates, phases and cycles in order
//! - **Stages**: builders and runners for `wps/`, `da{HH}_d{DD}/` and `wrf{HH}/`
//! - **Workdir**: per-date skeleton, input copy pool, observation staging
//! - **Config**: TOML configuration of folders, process counts and environment
//!
//! # Example
//!
//! ```rust,ignore
//! use wrfda_runner::pipeline::{Configuration, ForecastRun, InputDataset, Orchestrator, RunPhase};
//!
//! let config = Configuration::load("/runs/wrfda-runner.cfg")?;
//! let orchestrator = Orchestrator::local(config, "/runs");
//!
//! let start = wrfda_runner::pipeline::parse_compact_date("2020071512")?;
//! let run = ForecastRun::with_hours(start, 48, RunPhase::PreprocessThenAssimilate, InputDataset::Gfs)?;
//! orchestrator.run(&run).await?;
//! ```

pub mod config;
pub mod da;
pub mod orchestrator;
pub mod stage;
pub mod types;
pub mod workdir;
pub mod wps;
pub mod wrf;

pub use config::{ConfigError, Configuration, FoldersConf, ProcsConf, RunSettings};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use stage::StageEnv;
pub use types::{
    format_compact_date, parse_compact_date, Cycle, ForecastRun, InputDataset, RunPhase, Season,
    StepKind,
};
