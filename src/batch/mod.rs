//! Arguments files listing the dates of a batch.
//!
//! ```text
//! italy-config.gfs.cfg
//! 2020112600 24
//! 2020112700 48 IT
//! ```
//!
//! The first line names the configuration file, relative to the working
//! directory. Every other line is a period: a `YYYYMMDDHH` start, a duration
//! in hours and an optional domain code. Blank lines and `#` comments are
//! ignored.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::pipeline::types::{format_compact_date, parse_compact_date, InputDataset};

/// Default location of the arguments file inside a working directory.
pub const DEFAULT_ARGS_FILE: &str = "inputs/arguments.txt";

/// Errors reading or writing an arguments file.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot access arguments file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("arguments file `{0}` does not name a configuration file")]
    MissingConfig(String),

    #[error("invalid period on line {line}: {message}")]
    InvalidPeriod { line: usize, message: String },
}

/// Geographic area a period was requested for.
///
/// Kept so that arguments files round-trip; the domain layout of a run comes
/// from its namelists, not from this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownDomain {
    Italy,
    France,
}

impl KnownDomain {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Italy => "IT",
            Self::France => "FR",
        }
    }
}

impl fmt::Display for KnownDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for KnownDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IT" => Ok(Self::Italy),
            "FR" => Ok(Self::France),
            other => Err(format!("Unknown domain: {}", other)),
        }
    }
}

/// Dataset implied by a configuration file name ending in `.gfs.cfg` or
/// `.ifs.cfg`.
pub fn dataset_from_config_name(path: &Path) -> Option<InputDataset> {
    let name = path.to_string_lossy();
    if name.ends_with(".gfs.cfg") {
        Some(InputDataset::Gfs)
    } else if name.ends_with(".ifs.cfg") {
        Some(InputDataset::Ifs)
    } else {
        None
    }
}

/// Configuration file name written into new arguments files for `dataset`.
pub fn default_config_name(dataset: InputDataset) -> &'static str {
    match dataset {
        InputDataset::Gfs => "italy-config.gfs.cfg",
        InputDataset::Ifs => "france-config.ifs.cfg",
    }
}

/// One date of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub hours: u32,
    pub domain: Option<KnownDomain>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, hours: u32) -> Self {
        Self {
            start,
            hours,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: KnownDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::hours(i64::from(self.hours))
    }

    fn parse(line_no: usize, line: &str) -> Result<Self, BatchError> {
        let invalid = |message: String| BatchError::InvalidPeriod {
            line: line_no,
            message,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if !(2..=3).contains(&fields.len()) {
            return Err(invalid(format!(
                "expected `YYYYMMDDHH HOURS [DOMAIN]`, got `{}`",
                line
            )));
        }

        let start = parse_compact_date(fields[0]).map_err(|e| invalid(e.to_string()))?;
        let hours: u32 = fields[1]
            .parse()
            .map_err(|_| invalid(format!("invalid duration `{}`", fields[1])))?;
        if hours == 0 {
            return Err(invalid("duration must be greater than 0".to_string()));
        }
        let domain = match fields.get(2) {
            Some(code) => Some(code.parse().map_err(invalid)?),
            None => None,
        };

        Ok(Self {
            start,
            hours,
            domain,
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_compact_date(&self.start), self.hours)?;
        if let Some(domain) = self.domain {
            write!(f, " {}", domain)?;
        }
        Ok(())
    }
}

/// Parsed content of an arguments file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgsFile {
    /// Configuration file as written, relative to the working directory.
    pub config_path: PathBuf,
    pub periods: Vec<Period>,
}

impl ArgsFile {
    pub fn new(config_path: impl Into<PathBuf>, periods: Vec<Period>) -> Self {
        Self {
            config_path: config_path.into(),
            periods,
        }
    }

    /// Parses arguments file text; `source` names it in errors.
    pub fn parse(source: &str, text: &str) -> Result<Self, BatchError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (_, config) = lines
            .next()
            .ok_or_else(|| BatchError::MissingConfig(source.to_string()))?;

        let periods = lines
            .map(|(line_no, line)| Period::parse(line_no, line))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(config, periods))
    }

    /// Reads an arguments file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BatchError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Dataset implied by the configuration file name, if any.
    pub fn dataset_hint(&self) -> Option<InputDataset> {
        dataset_from_config_name(&self.config_path)
    }

    /// Formats the file content.
    pub fn to_text(&self) -> String {
        let mut text = format!("{}\n", self.config_path.display());
        for period in &self.periods {
            text.push_str(&period.to_string());
            text.push('\n');
        }
        text
    }

    /// Writes the file, or appends its periods if the file already exists.
    pub fn write_or_append(&self, path: impl AsRef<Path>) -> Result<(), BatchError> {
        let path = path.as_ref();
        let io_error = |source| BatchError::Io {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .map_err(io_error)?;
            let text: String = self.periods.iter().map(|p| format!("{}\n", p)).collect();
            file.write_all(text.as_bytes()).map_err(io_error)?;
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(io_error)?;
            file.write_all(self.to_text().as_bytes()).map_err(io_error)?;
        }

        tracing::info!(path = %path.display(), periods = self.periods.len(), "Wrote arguments file");
        Ok(())
    }
}
