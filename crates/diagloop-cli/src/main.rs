use anyhow::{Context, Result};
use clap::Parser;
use diagloop_core::{
    config::{ColorChoice, ConfigLoader, DiagConfig, DEFAULT_CONFIG_FILE},
    exit_codes, DiagnosticsFormatter, HttpConnector, Orchestrator,
};
use is_terminal::IsTerminal;
use log::LevelFilter;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    name = "diagloop",
    author,
    version,
    about = "Rebuild, audit and test an editor project over MCP"
)]
struct Cli {
    #[clap(
        long,
        short,
        default_value = DEFAULT_CONFIG_FILE,
        help = "Path to the YAML configuration file (optional; defaults apply when missing)"
    )]
    config: String,

    #[clap(long, help = "MCP endpoint URL, overriding config and DIAGLOOP_MCP_URL")]
    url: Option<String>,

    #[clap(long, help = "Stop after the console audit and build check")]
    skip_tests: bool,

    #[clap(long, help = "Do not ask the editor to refresh before auditing")]
    no_refresh: bool,

    #[clap(long, help = "Test platform to run (EditMode or PlayMode)")]
    mode: Option<String>,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Disable colored output")]
    no_color: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut DiagConfig) {
        if let Some(url) = &self.url {
            config.endpoint.url = url.clone();
        }
        if self.skip_tests {
            config.tests.skip = true;
        }
        if self.no_refresh {
            config.refresh.enabled = false;
        }
        if let Some(mode) = &self.mode {
            config.tests.mode = mode.clone();
        }
        if self.no_color {
            config.output.color = ColorChoice::Never;
        }
    }
}

fn color_enabled(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => {
            std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let mut config = ConfigLoader::load_or_default(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration after CLI overrides")?;

    let formatter = DiagnosticsFormatter::new(color_enabled(config.output.color));
    log::info!("Using MCP endpoint {}", config.endpoint.url);

    let connector = Arc::new(HttpConnector::new(config.endpoint.clone()));
    let orchestrator = Orchestrator::new(connector, config).with_formatter(formatter);

    let code = match orchestrator.run().await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            log::error!("Diagnostics failed: {}", e);
            if !e.is_retryable() {
                println!("{}", formatter.fail(&format!("Error: {}", e)));
            }
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}
