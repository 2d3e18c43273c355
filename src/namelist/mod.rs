//! Namelist rendering.
//!
//! Namelist templates are tera templates kept in the configured namelists
//! directory. Every template is rendered with the same set of variables
//! describing a time window:
//!
//! | variable | example |
//! |----------|---------|
//! | `start`, `end` | `2020-07-15_06:00:00` |
//! | `start_year`, `start_month`, `start_day`, `start_hour` | `2020`, `07`, `15`, `06` |
//! | `end_year`, `end_month`, `end_day`, `end_hour` | |
//! | `hours` | whole hours between start and end |

pub mod domains;

pub use domains::{parse_max_dom, resolve_domain_count};

use chrono::{DateTime, Utc};
use tera::{Context, Tera};
use tracing::debug;

use crate::error::RunError;
use crate::execution::{ExecContext, Location};

/// Date format used by WRF namelists.
pub const WRF_DATE_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Time window a namelist is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamelistArgs {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl NamelistArgs {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole hours between start and end.
    pub fn hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }

    fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("start", &self.start.format(WRF_DATE_FORMAT).to_string());
        context.insert("end", &self.end.format(WRF_DATE_FORMAT).to_string());
        for (prefix, date) in [("start", &self.start), ("end", &self.end)] {
            context.insert(format!("{}_year", prefix), &date.format("%Y").to_string());
            context.insert(format!("{}_month", prefix), &date.format("%m").to_string());
            context.insert(format!("{}_day", prefix), &date.format("%d").to_string());
            context.insert(format!("{}_hour", prefix), &date.format("%H").to_string());
        }
        context.insert("hours", &self.hours());
        context
    }
}

/// Renders template text for the given window.
pub fn render_text(name: &str, template: &str, args: &NamelistArgs) -> Result<String, RunError> {
    Tera::one_off(template, &args.context(), false)
        .map_err(|e| RunError::config(format!("cannot render namelist `{}`: {}", name, e)))
}

/// Renders the template `name` from `namelists_dir` into `target`.
///
/// Failures are recorded in `ctx`; nothing is written after a failure.
pub async fn render(
    ctx: &ExecContext,
    namelists_dir: &Location,
    name: &str,
    target: &Location,
    args: &NamelistArgs,
) {
    let Some(template) = ctx.read_text(&namelists_dir.join(name)).await else {
        return;
    };

    match render_text(name, &template, args) {
        Ok(text) => {
            debug!(template = name, target = %target, "Rendered namelist");
            ctx.write_text(target, &text).await;
        }
        Err(err) => {
            ctx.fail(err);
        }
    }
}
