use std::io;
use std::io::IsTerminal;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use owo_colors::OwoColorize;
use strum::VariantNames;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::UpstreamName;
use crate::domain::models::WidgetName;
use crate::domain::services::actions::help_text;

/// What the binary should do once the command line is parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Chat,
    Ask(String),
    Serve,
}

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
    std::process::exit(0);
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        if !io::stdin().is_terminal() {
            bail!(format!(
                "Config file already exists at {config_file_path_str}"
            ));
        }

        let overwrite = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Config file already exists at {config_file_path_str}. Overwrite it?"
            ))
            .default(false)
            .interact_opt()?
            .unwrap_or(false);
        if !overwrite {
            println!("Kept the existing config file.");
            return Ok(());
        }
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(config_file_path.clone()).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!(
        "Created default config file at {}",
        config_file_path.to_string_lossy()
    );
    return Ok(());
}

/// A config-backed option, readable from the environment as
/// `PROMPTGATE_<KEY>`.
fn arg_config(key: ConfigKey, help: &str) -> Arg {
    let env_name = format!(
        "PROMPTGATE_{}",
        key.to_string().replace('-', "_").to_uppercase()
    );

    let default = Config::default(key);
    let help = if default.is_empty() {
        help.to_string()
    } else {
        format!("{help} [default: {default}]")
    };

    return Arg::new(key.to_string())
        .long(key.to_string())
        .env(env_name)
        .num_args(1)
        .help(help);
}

fn arg_bool(key: ConfigKey, help: &str) -> Arg {
    return arg_config(key, help).value_parser(PossibleValuesParser::new(["true", "false"]));
}

fn client_args() -> Vec<Arg> {
    return vec![
        arg_config(ConfigKey::EndpointURL, "Base URL of the generation endpoint."),
        arg_config(
            ConfigKey::Identity,
            "Signed-in identity sent with each request. Leave empty to use the endpoint anonymously.",
        )
        .short('i'),
        arg_bool(
            ConfigKey::AllowAnonymous,
            "Allow sending prompts without an identity.",
        ),
        arg_config(
            ConfigKey::Model,
            "Model to answer prompts. Defaults to the last selected model, then the endpoint's default.",
        )
        .short('m'),
        arg_config(
            ConfigKey::RequestTimeout,
            "Milliseconds to wait for a generation to finish before giving up.",
        ),
        arg_config(
            ConfigKey::Verification,
            "How verification challenges are answered.",
        )
        .value_parser(PossibleValuesParser::new(WidgetName::VARIANTS)),
        arg_config(
            ConfigKey::VerificationToken,
            "Token used by the static verification method.",
        ),
        arg_config(
            ConfigKey::VerificationTTL,
            "Milliseconds a verification token stays usable.",
        ),
        arg_config(
            ConfigKey::MaxVerificationAttempts,
            "Verification challenges to attempt for one prompt before failing it.",
        ),
        arg_config(
            ConfigKey::StateDir,
            "Directory for the saved prompt draft and last selected model. Defaults to the cache directory.",
        ),
    ];
}

fn server_args() -> Vec<Arg> {
    return vec![
        arg_config(ConfigKey::ListenAddr, "Address the endpoint listens on.").short('l'),
        arg_config(ConfigKey::Upstream, "Language model provider to proxy to.")
            .value_parser(PossibleValuesParser::new(UpstreamName::VARIANTS)),
        arg_config(ConfigKey::UpstreamURL, "Base URL of the upstream provider."),
        arg_config(
            ConfigKey::UpstreamToken,
            "API token for the upstream provider.",
        ),
        arg_config(
            ConfigKey::TurnstileSecret,
            "Turnstile secret used to validate verification tokens. When empty, any non-empty token is accepted.",
        ),
        arg_config(
            ConfigKey::TurnstileSiteKey,
            "Turnstile site key shown on the verification page.",
        ),
        arg_config(ConfigKey::TurnstileURL, "Turnstile siteverify URL."),
        arg_config(
            ConfigKey::Models,
            "Served models as comma separated id:tier pairs, tier being free or premium.",
        ),
        arg_config(
            ConfigKey::DefaultModel,
            "Model used when a request names an unknown one.",
        ),
        arg_config(
            ConfigKey::PremiumUsers,
            "Comma separated identities on the premium plan.",
        ),
        arg_config(
            ConfigKey::RegisteredUsers,
            "Comma separated identities on the free plan.",
        ),
        arg_config(
            ConfigKey::GuestDailyLimit,
            "Daily requests for anonymous callers.",
        ),
        arg_config(
            ConfigKey::FreeDailyLimit,
            "Daily requests for free plan users.",
        ),
        arg_config(
            ConfigKey::PremiumDailyLimit,
            "Daily requests for premium plan users.",
        ),
        arg_config(
            ConfigKey::FloodInterval,
            "Seconds a caller must wait after a saved exchange before the next request.",
        ),
        arg_bool(
            ConfigKey::LegacyChecks,
            "Reject unknown identities and requests inside the flood interval.",
        ),
    ];
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. Asks before overwriting an existing file, and fails without a terminal to ask on.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_chat() -> Command {
    return Command::new("chat")
        .about("Start an interactive chat against the endpoint.")
        .args(client_args());
}

fn subcommand_ask() -> Command {
    return Command::new("ask")
        .about("Send a single prompt and print the answer.")
        .arg(
            Arg::new("prompt")
                .help("The prompt to send.")
                .num_args(1..)
                .required(true),
        )
        .args(client_args());
}

fn subcommand_serve() -> Command {
    return Command::new("serve")
        .about("Run the generation endpoint.")
        .args(server_args());
}

pub fn build() -> Command {
    let commands_text = help_text()
        .split('\n')
        .map(|line| {
            if line.starts_with('-') {
                return format!("  {line}");
            }
            if line.starts_with("COMMANDS:") || line.starts_with("HOTKEYS:") {
                return format!("CHAT {line}").bold().underline().to_string();
            }
            return line.to_string();
        })
        .collect::<Vec<String>>()
        .join("\n");

    let about = format!(
        "{}\n\nVersion: {}\nBuilt: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_BUILD_DATE")
    );

    return Command::new("promptgate")
        .about(about)
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .after_help(commands_text)
        .arg_required_else_help(false)
        .subcommand(subcommand_chat())
        .subcommand(subcommand_ask())
        .subcommand(subcommand_serve())
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .arg(
            Arg::new(ConfigKey::ConfigFile.to_string())
                .short('c')
                .long(ConfigKey::ConfigFile.to_string())
                .env("PROMPTGATE_CONFIG_FILE")
                .num_args(1)
                .help(format!("Path to configuration file [default: {}]", Config::default(ConfigKey::ConfigFile)))
                .global(true)
        );
}

pub async fn parse() -> Result<Option<Mode>> {
    let matches = build().get_matches();

    match matches.subcommand() {
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Mode::Chat));
        }
        Some(("ask", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            let prompt = subcmd_matches
                .get_many::<String>("prompt")
                .map(|words| return words.cloned().collect::<Vec<String>>().join(" "))
                .unwrap_or_default();
            return Ok(Some(Mode::Ask(prompt)));
        }
        Some(("serve", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Mode::Serve));
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
            return Ok(None);
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(None);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(None);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(None);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(None);
            }
        },
        _ => {
            Config::load(build(), vec![&matches]).await?;
            return Ok(Some(Mode::Chat));
        }
    }
}
