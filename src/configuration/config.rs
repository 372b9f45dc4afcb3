#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::env;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::Arg;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;
use tokio::fs;

use crate::domain::models::UpstreamName;
use crate::domain::models::WidgetName;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    ConfigFile,

    // Client
    AllowAnonymous,
    EndpointURL,
    Identity,
    MaxVerificationAttempts,
    Model,
    RequestTimeout,
    StateDir,
    Verification,
    VerificationToken,
    VerificationTTL,

    // Server
    DefaultModel,
    FloodInterval,
    FreeDailyLimit,
    GuestDailyLimit,
    LegacyChecks,
    ListenAddr,
    Models,
    PremiumDailyLimit,
    PremiumUsers,
    RegisteredUsers,
    TurnstileSecret,
    TurnstileSiteKey,
    TurnstileURL,
    Upstream,
    UpstreamToken,
    UpstreamURL,
}

/// Finds the clap argument backing a key, on the root command or any of
/// its subcommands.
fn find_arg(cmd: &Command, key: ConfigKey) -> Option<Arg> {
    let long = key.to_string();
    if let Some(arg) = cmd
        .get_arguments()
        .find(|e| return e.get_long() == Some(long.as_str()))
    {
        return Some(arg.clone());
    }

    return cmd
        .get_subcommands()
        .find_map(|subcmd| return find_arg(subcmd, key));
}

pub struct Config {}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return "".to_string();
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    /// Parses a key as a number, falling back to its default when the
    /// configured value is not one.
    pub fn get_u64(key: ConfigKey) -> u64 {
        return Config::get(key)
            .parse::<u64>()
            .or_else(|_| return Config::default(key).parse::<u64>())
            .unwrap_or(0);
    }

    pub fn get_bool(key: ConfigKey) -> bool {
        return Config::get(key) == "true";
    }

    pub fn default(key: ConfigKey) -> String {
        let default_upstream = UpstreamName::OpenAI.to_string();
        let default_verification = WidgetName::Prompt.to_string();

        #[cfg(not(target_os = "macos"))]
        let config_path = dirs::config_dir()
            .unwrap_or_else(env::temp_dir)
            .join("promptgate/config.toml");
        #[cfg(target_os = "macos")]
        let config_path = path::PathBuf::from(env::var("HOME").unwrap_or_default())
            .join(".config/promptgate/config.toml");

        let res = match key {
            ConfigKey::AllowAnonymous => "true",
            ConfigKey::EndpointURL => "http://127.0.0.1:8787",
            ConfigKey::Identity => "",
            ConfigKey::MaxVerificationAttempts => "3",
            ConfigKey::Model => "",
            ConfigKey::RequestTimeout => "30000",
            ConfigKey::StateDir => "",
            ConfigKey::Verification => &default_verification,
            ConfigKey::VerificationToken => "",
            ConfigKey::VerificationTTL => "300000",

            ConfigKey::DefaultModel => "gpt-4o-mini",
            ConfigKey::FloodInterval => "30",
            ConfigKey::FreeDailyLimit => "10",
            ConfigKey::GuestDailyLimit => "3",
            ConfigKey::LegacyChecks => "true",
            ConfigKey::ListenAddr => "127.0.0.1:8787",
            ConfigKey::Models => "gpt-4o-mini:free,gpt-4o:premium",
            ConfigKey::PremiumDailyLimit => "100",
            ConfigKey::PremiumUsers => "",
            ConfigKey::RegisteredUsers => "",
            ConfigKey::TurnstileSecret => "",
            ConfigKey::TurnstileSiteKey => "",
            ConfigKey::TurnstileURL => {
                "https://challenges.cloudflare.com/turnstile/v0/siteverify"
            }
            ConfigKey::Upstream => &default_upstream,
            ConfigKey::UpstreamToken => "",
            ConfigKey::UpstreamURL => "https://api.openai.com",

            // Special
            ConfigKey::ConfigFile => return config_path.to_string_lossy().to_string(),
        };

        return res.to_string();
    }

    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(config_path).await?;
            let doc = toml_str.parse::<toml_edit::Document>()?;

            for key in ConfigKey::iter() {
                if let Some(val) = doc.get(&key.to_string()) {
                    // Use clap value parsers to do validation.
                    let mut possible_values = vec![];
                    if let Some(arg) = find_arg(&cmd, key) {
                        possible_values = arg
                            .get_possible_values()
                            .iter()
                            .map(|e| return e.get_name().to_string())
                            .collect::<Vec<String>>();
                    }

                    if let Some(val_int) = val.as_integer() {
                        Config::set(key, &val_int.to_string());
                    } else if let Some(val_bool) = val.as_bool() {
                        Config::set(key, &val_bool.to_string());
                    } else if let Some(val_str) = val.as_str() {
                        if val_str.is_empty() {
                            continue;
                        }
                        if !possible_values.is_empty()
                            && !possible_values.contains(&val_str.to_string())
                        {
                            bail!(format!("config.toml has an invalid value for key '{key}': {val_str}\nPossible values are: {}", possible_values.join(", ")));
                        }
                        Config::set(key, val_str);
                    }
                }
            }
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            endpoint_url = Config::get(ConfigKey::EndpointURL),
            identity = Config::get(ConfigKey::Identity),
            model = Config::get(ConfigKey::Model),
            verification = Config::get(ConfigKey::Verification),
            listen_addr = Config::get(ConfigKey::ListenAddr),
            upstream = Config::get(ConfigKey::Upstream),
            "config"
        );

        return Ok(());
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = find_arg(&cmd, key)?;
                let mut description = arg
                    .get_help()
                    .map(|e| return e.to_string())
                    .unwrap_or_default();

                description = description
                    .split("[default:")
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                if !arg.get_possible_values().is_empty() {
                    let possible_values = arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    description = format!("{description} [possible values: {}]", possible_values);
                }

                let mut val = Config::default(key);
                if val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else if val.parse::<i64>().is_ok() || val == "true" || val == "false" {
                    val = format!("{key} = {val}");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
