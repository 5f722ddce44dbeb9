use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::BotError;

pub const ENV_FILE_NAME: &str = ".env";

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub env_file: PathBuf,
    pub single_instance: bool,
    pub drop_webhook: bool,
    pub echo_prefix: Option<String>,
}

impl Config {
    /// Reads `env_file` when it exists, then resolves settings with the
    /// process environment taking precedence over the file.
    pub fn load(env_file: &Path) -> Result<Config, BotError> {
        Config::load_with(env_file, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(env_file: &Path, env_lookup: F) -> Result<Config, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_vars = if env_file.exists() {
            info!("[config] loading env file {}", env_file.display());
            read_env_file(env_file)?
        } else {
            warn!("[config] env file not found at {}", env_file.display());
            HashMap::new()
        };

        Config::from_sources(env_file, &file_vars, env_lookup)
    }

    pub fn from_sources<F>(
        env_file: &Path,
        file_vars: &HashMap<String, String>,
        env_lookup: F,
    ) -> Result<Config, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env_lookup(key).or_else(|| file_vars.get(key).cloned());

        let token = lookup("TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::MissingToken {
                path: env_file.to_path_buf(),
            })?;

        let single_instance = parse_flag("SINGLE_INSTANCE", lookup("SINGLE_INSTANCE"), true)?;
        let drop_webhook = parse_flag("DROP_WEBHOOK", lookup("DROP_WEBHOOK"), true)?;
        let echo_prefix = lookup("ECHO_PREFIX").filter(|p| !p.is_empty());

        Ok(Config {
            token,
            env_file: env_file.to_path_buf(),
            single_instance,
            drop_webhook,
            echo_prefix,
        })
    }
}

/// `.env` next to the running executable, or in the working directory when
/// the executable path can't be resolved.
pub fn default_env_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(ENV_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(ENV_FILE_NAME))
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, BotError> {
    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    Ok(vars)
}

fn parse_flag(
    key: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, BotError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BotError::InvalidSetting { key, value }),
    }
}
