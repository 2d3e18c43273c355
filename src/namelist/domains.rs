//! Domain count resolution.
//!
//! The number of nested domains of a run is the `max_dom` value declared in
//! the namelist template of the first stage the run executes.

use tracing::debug;

use crate::error::RunError;
use crate::execution::{ExecContext, Location};
use crate::pipeline::types::RunPhase;

/// Extracts the `max_dom` value from namelist text.
///
/// The first line starting with `max_dom` (after leading whitespace) wins;
/// the value is what follows `=`, with surrounding blanks and commas removed.
pub fn parse_max_dom(source: &str, text: &str) -> Result<u32, RunError> {
    let line = text
        .lines()
        .map(|line| line.trim_start_matches([' ', '\t']))
        .find(|line| line.starts_with("max_dom"))
        .ok_or_else(|| RunError::config(format!("max_dom property not found in `{}`", source)))?;

    let (_, value) = line.split_once('=').ok_or_else(|| {
        RunError::config(format!("malformed max_dom property in `{}`: {}", source, line))
    })?;

    let value = value
        .split('=')
        .next()
        .unwrap_or_default()
        .trim_matches([' ', '\t', ',', '\r']);
    let count: u32 = value.parse().map_err(|e| {
        RunError::config(format!("cannot convert max_dom `{}` to integer: {}", value, e))
    })?;

    if count == 0 {
        return Err(RunError::config(format!(
            "max_dom in `{}` must be at least 1",
            source
        )));
    }
    Ok(count)
}

/// Name of the template declaring the domains for `phase`.
pub fn domain_template(phase: RunPhase) -> &'static str {
    if phase.includes_preprocessing() {
        "namelist.wps"
    } else {
        "namelist.step.wrf"
    }
}

/// Reads the domain count of a run from the namelists directory.
///
/// Every failure is a configuration error, returned and recorded in `ctx`.
/// The value is read again on every call.
pub async fn resolve_domain_count(
    ctx: &ExecContext,
    namelists_dir: &Location,
    phase: RunPhase,
) -> Result<u32, RunError> {
    ctx.result()?;

    let template = namelists_dir.join(domain_template(phase));
    if !ctx.is_file(&template).await {
        ctx.fail(RunError::config(format!(
            "cannot read domain count: `{}` not found",
            template
        )));
        return ctx.result().map(|_| 0);
    }

    let result = match ctx.try_read_text(&template).await {
        Ok(text) => parse_max_dom(&template.to_string(), &text),
        Err(err) => Err(RunError::config(format!(
            "cannot read domain count from `{}`: {}",
            template, err
        ))),
    };

    match result {
        Ok(count) => {
            debug!(template = %template, count, "Resolved domain count");
            Ok(count)
        }
        Err(err) => {
            ctx.fail(err.clone());
            Err(err)
        }
    }
}
