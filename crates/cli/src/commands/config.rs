use clap::Subcommand;
use warpscan_core::config::AppConfig;

use super::utils::{print_info, print_json, print_success};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate the configuration
    Validate,

    /// Show the effective configuration (file, environment and defaults merged)
    Show {
        /// Show the block-explorer API key
        #[arg(long)]
        show_sensitive: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands, file: &str, config: AppConfig) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Validate => validate_config(file, &config),
        ConfigCommands::Show { show_sensitive } => show_config(config, show_sensitive),
    }
}

fn validate_config(file: &str, config: &AppConfig) -> anyhow::Result<()> {
    print_info(&format!("Validating configuration from {file}..."));
    config.validate()?;
    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Endpoints: {}", config.endpoints.len());
    for endpoint in &config.endpoints {
        println!("    - {} ({}, {}/s)", endpoint.name, endpoint.url, endpoint.rate_limit_per_second);
    }
    println!("  Cache: {}", if config.cache.enabled { "enabled" } else { "disabled" });
    if let Some(path) = &config.cache.persistent_path {
        println!("  Persistent cache: {}", path.display());
    }
    println!(
        "  Block explorer: {}",
        if config.explorer.is_configured() { "configured" } else { "no api key" }
    );
    Ok(())
}

fn show_config(mut config: AppConfig, show_sensitive: bool) -> anyhow::Result<()> {
    if !show_sensitive && config.explorer.api_key.is_some() {
        config.explorer.api_key = Some("***".to_string());
    }
    print_json(&config)
}
