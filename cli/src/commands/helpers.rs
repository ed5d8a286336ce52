use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::process;

use mealplan_core::error::PlanError;
use mealplan_core::models::{DATE_FORMAT, Ingredient};

pub(crate) fn parse_date(date_str: Option<&str>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse an `--ingredient` value of the form `name[,amount[,unit]]`.
pub(crate) fn parse_ingredient(s: &str) -> Result<Ingredient> {
    let mut parts = s.splitn(3, ',').map(str::trim);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name,amount,unit' (e.g. 'Tomato,2,pcs')");
    }
    Ok(Ingredient {
        name: name.to_string(),
        amount: parts.next().unwrap_or_default().to_string(),
        unit: parts.next().unwrap_or_default().to_string(),
    })
}

/// Unwrap an engine result. A not-found error is reported and the process
/// exits with status 2; anything else propagates.
pub(crate) fn or_exit_not_found<T>(result: Result<T, PlanError>, json: bool) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_not_found() => {
            if json {
                println!("{}", json_error(&err.to_string()));
            } else {
                eprintln!("{err}");
            }
            process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn check_mark(checked: bool) -> &'static str {
    if checked { "[x]" } else { "[ ]" }
}
