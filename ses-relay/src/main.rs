mod auth;
mod config;
mod forward;
mod handler;
mod metrics;
mod ses;

use crate::auth::{AuthGate, AuthPolicy};
use crate::config::{Command, Config};
use crate::forward::Forwarder;
use crate::handler::RelayHandler;
use crate::metrics::Metrics;
use crate::ses::SesProvider;
use anyhow::{anyhow, Context, Result};
use log::info;
use relay_server::{AuthMechanism, Server};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::env;
use std::fs::File;
use std::path::Path;
use std::process;
use time::format_description;
use time::OffsetDateTime;

fn log_config() -> simplelog::Config {
    ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .add_filter_allow_str("relay_session")
        .add_filter_allow_str("relay_server")
        .add_filter_allow_str("ses_relay")
        .build()
}

fn setup_logger(log_dir: Option<&str>, verbose: bool) -> Result<()> {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        log_config(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(log_dir) = log_dir {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let format = format_description::parse("[year][month][day][hour][minute][second]")?;
        let filename = format!("smtp-{}.log", now.format(&format)?);
        let filepath = Path::new(log_dir).join(filename);
        let file = File::create(&filepath)
            .with_context(|| format!("Cannot create log file {}", filepath.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Trace, log_config(), file));
    }
    CombinedLogger::init(loggers).map_err(|err| anyhow!("Cannot initialize logger: {}", err))
}

fn start(config: &Config) -> Result<()> {
    let metrics = Metrics::new(config.statsd.as_deref())?;
    let provider = SesProvider::new(
        &config.region,
        config.credentials.clone(),
        config.ses_timeout,
    )?;
    let forwarder = Forwarder::new(Box::new(provider), config.routing.clone());
    let gate = AuthGate::new(
        config.auth_policy,
        config.username.clone(),
        config.password.clone(),
    );
    let auth_enabled = gate.policy() != AuthPolicy::Disabled;
    let handler = RelayHandler::new(gate, forwarder, metrics);

    let addr = config.listen_addr();
    let mut server = Server::new(handler);
    server
        .with_name(config.server_name.clone())
        .with_ssl(config.ssl_config())
        .with_num_threads(config.threads)
        .with_timeouts(config.read_timeout, config.write_timeout)
        .with_max_message_size(config.max_message_size)
        .with_max_recipients(config.max_recipients)
        .with_addr(&addr)
        .with_context(|| format!("Invalid listen address {}", addr))?;
    if auth_enabled {
        server
            .with_auth(AuthMechanism::Plain)
            .with_auth(AuthMechanism::Login)
            .with_insecure_auth(config.insecure_auth);
    }
    info!("Starting server at {} for region {}", addr, config.region);
    server.serve_forever().context("SMTP server failed")
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = match config::parse_args(&args)? {
        Command::Help(usage) => {
            print!("{}", usage);
            return Ok(());
        }
        Command::Run(config) => config,
    };
    setup_logger(config.log_dir.as_deref(), config.verbose)?;
    start(&config)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
