//! Core types of a forecast run.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::RunError;

/// Length of an assimilation step forecast.
pub const STEP_HOURS: i64 = 3;

/// Global model data is fetched this many hours before the run start.
pub const WPS_LEAD_HOURS: i64 = 6;

/// Which stages of the pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// WPS and real only.
    PreprocessOnly,
    /// The three DA/WRF cycles only, from already staged inputs.
    AssimilateOnly,
    /// Both, in sequence.
    PreprocessThenAssimilate,
}

impl RunPhase {
    pub fn includes_preprocessing(&self) -> bool {
        matches!(self, Self::PreprocessOnly | Self::PreprocessThenAssimilate)
    }

    pub fn includes_assimilation(&self) -> bool {
        matches!(self, Self::AssimilateOnly | Self::PreprocessThenAssimilate)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreprocessOnly => write!(f, "WPS"),
            Self::AssimilateOnly => write!(f, "DA"),
            Self::PreprocessThenAssimilate => write!(f, "WPSDA"),
        }
    }
}

/// Global model providing the initial and boundary conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputDataset {
    Gfs,
    Ifs,
}

impl InputDataset {
    /// Name of the ungrib variable table for this dataset.
    pub fn vtable(&self) -> &'static str {
        match self {
            Self::Gfs => "Vtable.GFS",
            Self::Ifs => "Vtable.ECMWF",
        }
    }
}

impl std::fmt::Display for InputDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gfs => write!(f, "GFS"),
            Self::Ifs => write!(f, "IFS"),
        }
    }
}

/// A single forecast run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRun {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub phase: RunPhase,
    pub dataset: InputDataset,
}

impl ForecastRun {
    /// Creates a run over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `end` is not after `start`.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        phase: RunPhase,
        dataset: InputDataset,
    ) -> Result<Self, RunError> {
        if end <= start {
            return Err(RunError::config(format!(
                "run end {} must be after start {}",
                format_compact_date(&end),
                format_compact_date(&start)
            )));
        }
        Ok(Self {
            start,
            end,
            phase,
            dataset,
        })
    }

    /// Creates a run lasting `hours` from `start`.
    pub fn with_hours(
        start: DateTime<Utc>,
        hours: u32,
        phase: RunPhase,
        dataset: InputDataset,
    ) -> Result<Self, RunError> {
        Self::new(start, start + Duration::hours(i64::from(hours)), phase, dataset)
    }

    /// Whole hours between start and end.
    pub fn duration_hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }

    /// Season of the run start, selecting the covariance matrices.
    pub fn season(&self) -> Season {
        Season::from_month(self.start.month())
    }
}

/// One of the three assimilation cycles of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cycle(u8);

impl Cycle {
    /// All cycles in execution order.
    pub const ALL: [Cycle; 3] = [Cycle(1), Cycle(2), Cycle(3)];

    /// Creates a cycle; only 1, 2 and 3 are valid.
    pub fn new(number: u8) -> Result<Self, RunError> {
        match number {
            1..=3 => Ok(Self(number)),
            other => Err(RunError::config(format!(
                "invalid cycle {}: expected 1, 2 or 3",
                other
            ))),
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// Assimilation instant: `start - (3 - c) * 3h`.
    pub fn instant(&self, start: &DateTime<Utc>) -> DateTime<Utc> {
        *start - Duration::hours(STEP_HOURS * i64::from(3 - self.0))
    }

    /// True for the last cycle, which drives the extended forecast.
    pub fn is_main_run(&self) -> bool {
        self.0 == 3
    }

    /// Forecast window of the WRF run following this cycle's analysis.
    pub fn wrf_window(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let instant = self.instant(start);
        if self.is_main_run() {
            (instant, *end)
        } else {
            (instant, instant + Duration::hours(STEP_HOURS))
        }
    }

    /// The cycle feeding this one's first guess, if any.
    pub fn previous(&self) -> Option<Cycle> {
        match self.0 {
            1 => None,
            n => Some(Cycle(n - 1)),
        }
    }
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meteorological season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// DJF winter, MAM spring, JJA summer, SON fall.
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Fall,
            _ => Self::Winter,
        }
    }

    /// Directory name of this season's covariance matrices.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Winter => "winter",
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Fall => "fall",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step of one cycle, runnable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    BuildDa,
    RunDa,
    BuildWrf,
    RunWrf,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuildDa => write!(f, "build-da"),
            Self::RunDa => write!(f, "run-da"),
            Self::BuildWrf => write!(f, "build-wrf"),
            Self::RunWrf => write!(f, "run-wrf"),
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build-da" | "buildda" => Ok(Self::BuildDa),
            "run-da" | "runda" => Ok(Self::RunDa),
            "build-wrf" | "buildwrf" => Ok(Self::BuildWrf),
            "run-wrf" | "runwrf" => Ok(Self::RunWrf),
            other => Err(format!("Unknown step kind: {}", other)),
        }
    }
}

/// Parses a `YYYYMMDDHH` date (a bare `YYYYMMDD` means hour 00).
pub fn parse_compact_date(value: &str) -> Result<DateTime<Utc>, RunError> {
    let value = value.trim();
    let invalid = || RunError::config(format!("invalid date `{}`: expected YYYYMMDDHH", value));

    if !(value.len() == 8 || value.len() == 10) || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32, RunError> {
        value[range].parse().map_err(|_| invalid())
    };
    let year = field(0..4)? as i32;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let hour = if value.len() == 10 { field(8..10)? } else { 0 };

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

/// Formats a date as `YYYYMMDDHH`.
pub fn format_compact_date(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d%H").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_cycle_instants() {
        let start = at(2020, 7, 15, 12);
        let hours: Vec<u32> = Cycle::ALL.iter().map(|c| c.instant(&start).hour()).collect();
        assert_eq!(hours, vec![6, 9, 12]);

        let start = at(2020, 7, 15, 3);
        assert_eq!(Cycle::ALL[0].instant(&start), at(2020, 7, 14, 21));
    }

    #[test]
    fn test_wrf_windows() {
        let start = at(2020, 7, 15, 12);
        let end = at(2020, 7, 17, 12);

        let (from, to) = Cycle::ALL[0].wrf_window(&start, &end);
        assert_eq!((from, to), (at(2020, 7, 15, 6), at(2020, 7, 15, 9)));

        let (from, to) = Cycle::ALL[1].wrf_window(&start, &end);
        assert_eq!((from, to), (at(2020, 7, 15, 9), at(2020, 7, 15, 12)));

        let (from, to) = Cycle::ALL[2].wrf_window(&start, &end);
        assert_eq!((from, to), (start, end));
    }

    #[test]
    fn test_cycle_validation() {
        assert!(Cycle::new(0).is_err());
        assert!(Cycle::new(4).is_err());
        let third = Cycle::new(3).unwrap();
        assert!(third.is_main_run());
        assert_eq!(third.previous(), Some(Cycle::ALL[1]));
        assert_eq!(Cycle::ALL[0].previous(), None);
    }

    #[test]
    fn test_seasons() {
        assert_eq!(Season::from_month(12), Season::Winter);
        assert_eq!(Season::from_month(1), Season::Winter);
        assert_eq!(Season::from_month(2), Season::Winter);
        assert_eq!(Season::from_month(3), Season::Spring);
        assert_eq!(Season::from_month(7), Season::Summer);
        assert_eq!(Season::from_month(11), Season::Fall);
        assert_eq!(Season::Fall.to_string(), "fall");
    }

    #[test]
    fn test_phase_stages() {
        assert!(RunPhase::PreprocessOnly.includes_preprocessing());
        assert!(!RunPhase::PreprocessOnly.includes_assimilation());
        assert!(!RunPhase::AssimilateOnly.includes_preprocessing());
        assert!(RunPhase::PreprocessThenAssimilate.includes_preprocessing());
        assert!(RunPhase::PreprocessThenAssimilate.includes_assimilation());
    }

    #[test]
    fn test_forecast_run() {
        let run = ForecastRun::with_hours(
            at(2020, 7, 15, 12),
            48,
            RunPhase::PreprocessThenAssimilate,
            InputDataset::Gfs,
        )
        .unwrap();
        assert_eq!(run.end, at(2020, 7, 17, 12));
        assert_eq!(run.duration_hours(), 48);
        assert_eq!(run.season(), Season::Summer);

        let err = ForecastRun::new(
            run.end,
            run.start,
            RunPhase::AssimilateOnly,
            InputDataset::Ifs,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be after"));
    }

    #[test]
    fn test_compact_dates() {
        assert_eq!(parse_compact_date("2020071512").unwrap(), at(2020, 7, 15, 12));
        assert_eq!(parse_compact_date("20200715").unwrap(), at(2020, 7, 15, 0));
        assert!(parse_compact_date("2020071525").is_err());
        assert!(parse_compact_date("20201315").is_err());
        assert!(parse_compact_date("2020-07-15").is_err());
        assert_eq!(format_compact_date(&at(2020, 7, 5, 3)), "2020070503");
    }

    #[test]
    fn test_step_kind_parse() {
        assert_eq!("build-da".parse::<StepKind>().unwrap(), StepKind::BuildDa);
        assert_eq!("RUN-WRF".parse::<StepKind>().unwrap(), StepKind::RunWrf);
        assert!("deploy".parse::<StepKind>().is_err());
        assert_eq!(StepKind::BuildWrf.to_string(), "build-wrf");
    }

    #[test]
    fn test_vtable() {
        assert_eq!(InputDataset::Gfs.vtable(), "Vtable.GFS");
        assert_eq!(InputDataset::Ifs.vtable(), "Vtable.ECMWF");
    }
}
