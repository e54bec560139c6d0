use anyhow::Result;
use clap::{CommandFactory, Parser};
use scanchime::cli::{Cli, Commands};
use scanchime::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!("scanchime {}", scanchime::version_string());

    match cli.command {
        None | Some(Commands::Run) => {
            let config = apply_cli_overrides(load_config(cli.config.as_deref())?, &cli);
            config.validate()?;
            scanchime::app::run(config, cli.auto_start, cli.quiet).await?;
        }
        Some(Commands::Devices) => {
            let config = load_config(cli.config.as_deref())?;
            scanchime::app::list_devices(&config).await?;
        }
        Some(Commands::Check { ref mapping }) => {
            let config = apply_cli_overrides(load_config(cli.config.as_deref())?, &cli);
            let source = mapping.clone().unwrap_or_else(|| config.mapping.source.clone());
            scanchime::app::check_mapping(&config, &source, cli.quiet).await?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "scanchime", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-q` → warn, default → info,
/// `-v` → debug, `-vv` → trace.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scanchime={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/scanchime/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// CLI flags override both the file and the environment.
fn apply_cli_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(mapping) = &cli.mapping {
        config.mapping.source = mapping.clone();
    }
    if let Some(assets) = &cli.assets {
        config.assets.base = assets.clone();
    }
    if let Some(facing) = cli.facing {
        config.capture.facing = facing;
    }
    if let Some(debounce) = cli.debounce {
        config.pipeline.debounce_ms = debounce.as_millis() as u64;
    }
    if let Some(device) = &cli.audio_device {
        config.audio.device = Some(device.clone());
    }
    config
}
