use crate::output::print_json;
use anyhow::{bail, Context};
use clap::Subcommand;
use extract_core::{
    config::{Config, WarnLevel},
    schedule::TimeRange,
    types::SchedulerMode,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print config.yaml
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Change when the orchestrator works
    Scheduler {
        /// on, ranges or off
        #[arg(long)]
        mode: Option<String>,
        /// Seconds between two orchestrator passes
        #[arg(long, value_name = "SECS")]
        frequency: Option<u32>,
        /// Working range "DAYS TIMES", e.g. "1-5 07:00-18:30"; replaces the current ranges (repeatable)
        #[arg(long = "range", value_parser = parse_range, value_name = "RANGE")]
        ranges: Vec<TimeRange>,
        /// Remove every working range
        #[arg(long, conflicts_with = "ranges")]
        clear_ranges: bool,
    },
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Scheduler {
            mode,
            frequency,
            ranges,
            clear_ranges,
        } => scheduler(root, mode.as_deref(), frequency, ranges, clear_ranges, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate(root);

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        bail!("config validation found errors");
    }
    Ok(())
}

fn scheduler(
    root: &Path,
    mode: Option<&str>,
    frequency: Option<u32>,
    ranges: Vec<TimeRange>,
    clear_ranges: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    if let Some(mode) = mode {
        config.scheduler.mode = mode.parse::<SchedulerMode>()?;
    }
    if let Some(freq) = frequency {
        config.scheduler.frequency_secs = freq;
    }
    if clear_ranges {
        config.scheduler.ranges.clear();
    } else if !ranges.is_empty() {
        config.scheduler.ranges = ranges;
    }

    let errors: Vec<String> = config
        .validate(root)
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !errors.is_empty() {
        bail!("{}", errors.join("; "));
    }
    config.save(root).context("failed to save config")?;

    if json {
        print_json(&config.scheduler)?;
    } else {
        println!(
            "Orchestrator: mode {}, every {}s, {} range(s).",
            config.scheduler.mode,
            config.scheduler.frequency_secs,
            config.scheduler.ranges.len()
        );
    }
    Ok(())
}

/// `1-5 07:00-18:30`; a single day (`6 08:00-12:00`) is accepted.
fn parse_range(raw: &str) -> Result<TimeRange, String> {
    let (days, times) = raw
        .trim()
        .split_once(' ')
        .ok_or_else(|| format!("expected \"DAYS TIMES\", got '{raw}'"))?;
    let (day_from, day_to) = days.split_once('-').unwrap_or((days, days));
    let parse_day = |d: &str| {
        d.trim()
            .parse::<u8>()
            .map_err(|_| format!("invalid day '{d}' (1 = Monday .. 7 = Sunday)"))
    };
    let (time_from, time_to) = times
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("expected HH:MM-HH:MM, got '{times}'"))?;
    TimeRange::new(parse_day(day_from)?, parse_day(day_to)?, time_from, time_to)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_with_day_span() {
        let r = parse_range("1-5 07:00-18:30").unwrap();
        assert_eq!((r.day_from, r.day_to), (1, 5));
        assert_eq!((r.time_from.as_str(), r.time_to.as_str()), ("07:00", "18:30"));
    }

    #[test]
    fn range_with_single_day() {
        let r = parse_range("6 08:00-24:00").unwrap();
        assert_eq!((r.day_from, r.day_to), (6, 6));
    }

    #[test]
    fn range_errors() {
        assert!(parse_range("1-5").is_err());
        assert!(parse_range("0-5 07:00-18:00").is_err());
        assert!(parse_range("1-5 07:00").is_err());
        assert!(parse_range("1-5 25:00-26:00").is_err());
    }
}
