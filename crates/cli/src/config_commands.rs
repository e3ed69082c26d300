use std::{path::Path, process::ExitCode};

use {
    anyhow::Result,
    clap::Subcommand,
    secrecy::Secret,
    warelay_config::{RelayConfig, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration and report errors/warnings.
    Check,
    /// Print the resolved configuration as TOML, secrets redacted.
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<ExitCode> {
    match action {
        ConfigAction::Check => Ok(if check(path)? > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }),
        ConfigAction::Show => show(path),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

const REDACTED: &str = "[REDACTED]";

/// Print diagnostics; returns the number of errors.
fn check(path: Option<&Path>) -> Result<usize> {
    match path
        .map(Path::to_path_buf)
        .or_else(warelay_config::find_config_file)
    {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let config = warelay_config::load_or_discover(path)?;
    let result = warelay_config::validate(&config);

    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !result.diagnostics.is_empty() {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    Ok(errors)
}

fn show(path: Option<&Path>) -> Result<ExitCode> {
    let config = warelay_config::load_or_discover(path)?;
    print!("{}", render(&config)?);
    Ok(ExitCode::SUCCESS)
}

fn render(config: &RelayConfig) -> Result<String> {
    Ok(toml::to_string_pretty(&redacted(config))?)
}

fn redacted(config: &RelayConfig) -> RelayConfig {
    let mut config = config.clone();
    if config.webhook.secret.is_some() {
        config.webhook.secret = Some(Secret::new(REDACTED.into()));
    }
    config
}
