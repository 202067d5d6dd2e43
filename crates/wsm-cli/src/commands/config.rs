use wsm_core::config::{ClientConfig, CONFIG_KEYS};

use crate::cli::ConfigCommands;
use crate::config_file;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => {
            let config = config_file::load_effective().map_err(CliError::Config)?;
            if json {
                let mut shown = config;
                if shown.access_token.is_some() {
                    shown.access_token = Some("[REDACTED]".to_string());
                }
                println!("{}", shown.to_json_pretty()?);
            } else {
                for line in describe_config(&config) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            let mut config = config_file::load().map_err(CliError::Config)?;
            config.set_value(&key, &value)?;
            let path = config_file::save(&config).map_err(CliError::Config)?;
            println!("Updated {key} in {}", path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            let path = config_file::default_config_path().map_err(CliError::Config)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// One `key = value` line per settable key, with the access token masked.
pub fn describe_config(config: &ClientConfig) -> Vec<String> {
    CONFIG_KEYS
        .iter()
        .map(|key| {
            let value = match *key {
                "api_base_url" => config.api_base_url.clone().unwrap_or_default(),
                "access_token" => config
                    .access_token
                    .as_ref()
                    .map(|_| "[REDACTED]".to_string())
                    .unwrap_or_default(),
                "autosave_interval_secs" => config.autosave_interval_secs.to_string(),
                "drain_interval_secs" => config.drain_interval_secs.to_string(),
                "retry.base_delay_ms" => config.retry.base_delay_ms.to_string(),
                "retry.max_delay_ms" => config.retry.max_delay_ms.to_string(),
                "retry.stuck_after_attempts" => config.retry.stuck_after_attempts.to_string(),
                "retention.max_points" => config.retention.max_points.to_string(),
                "retention.max_age_days" => config.retention.max_age_days.to_string(),
                _ => String::new(),
            };
            format!("{key} = {value}")
        })
        .collect()
}
