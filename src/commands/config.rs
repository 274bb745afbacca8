use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;

use super::print_json;
use crate::core::config::{Config, KEYS};
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", sub_matches)) => show(sub_matches),
        Some(("set", sub_matches)) => set(sub_matches),
        Some(("reset", _)) => reset(),
        Some(("path", _)) => {
            println!("{}", Config::get_config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Use 'wd config --help' for more information.");
            Ok(())
        }
    }
}

fn show(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    if matches.get_flag("json") {
        return print_json(&config);
    }
    let path = Config::get_config_path().ok();
    system_formatters::print_config(&config, path.as_deref());
    Ok(())
}

fn set(matches: &ArgMatches) -> Result<()> {
    let key = matches
        .get_one::<String>("key")
        .context("Key argument is required")?;
    let value = matches
        .get_one::<String>("value")
        .context("Value argument is required")?;

    let mut config = Config::load()?;
    if let Err(e) = config.set(key, value) {
        println!("{}", format!("✗ {}", e).red());
        println!("{}", format!("Valid keys: {}", KEYS.join(", ")).dimmed());
        return Err(e.into());
    }
    config.save()?;

    println!("{}", format!("✓ {} set to {}", key, value).green());
    Ok(())
}

fn reset() -> Result<()> {
    Config::default().save()?;
    println!("{}", "✓ Configuration reset to defaults".green());
    Ok(())
}
