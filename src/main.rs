//! Binary entry point for the buildvm CLI.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use buildvm::driver::{Driver, DriverKind, Instance, InstanceCreateOpts, Os, Platform};
use buildvm::google::{GoogleDriver, GoogleDriverError};
use buildvm::ssh::{DialPolicy, RusshDialer, SshError, SshTarget, dial_retry};
use buildvm::util::{expand_tilde, read_to_string_ambient};
use buildvm::GoogleConfig;

mod cli;

use cli::{Cli, ConnectCommand, CreateCommand, OsArg, TagCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("driver error: {0}")]
    Driver(#[from] GoogleDriverError),
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),
    #[error("invalid tag `{0}`: expected key=value")]
    InvalidTag(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let cancel = cancel_on_ctrl_c();
    match cli {
        Cli::Ping => {
            load_driver()?.ping(&cancel).await?;
            writeln!(io::stdout(), "ok")?;
            Ok(())
        }
        Cli::Create(command) => create(command, &cancel).await,
        Cli::Destroy(command) => {
            load_driver()?.destroy(&command.ids, &cancel).await?;
            Ok(())
        }
        Cli::Tag(command) => tag(command, &cancel).await,
        Cli::Connect(command) => connect(command, &cancel).await,
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

fn load_driver() -> Result<GoogleDriver, CliError> {
    let config =
        GoogleConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    Ok(GoogleDriver::new(&config)?)
}

async fn create(command: CreateCommand, cancel: &CancellationToken) -> Result<(), CliError> {
    let driver = load_driver()?;
    let os = match command.os {
        OsArg::Linux => Os::Linux,
        OsArg::Windows => Os::Windows,
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX));
    let opts = InstanceCreateOpts::builder()
        .runner_name(command.runner)
        .pool_name(command.pool)
        .platform(Platform {
            os,
            arch: command.arch,
        })
        .timestamp(timestamp)
        .build()
        .map_err(GoogleDriverError::from)?;

    let instance = driver.create(&opts, cancel).await?;
    write_instance(io::stdout(), &instance)?;
    Ok(())
}

async fn tag(command: TagCommand, cancel: &CancellationToken) -> Result<(), CliError> {
    let tags = parse_tags(&command.tags)?;
    let driver = load_driver()?;
    let instance = Instance::known(DriverKind::Google, command.id, command.zone);
    driver.set_tags(&instance, &tags, cancel).await?;
    Ok(())
}

async fn connect(command: ConnectCommand, cancel: &CancellationToken) -> Result<(), CliError> {
    let key_path = expand_tilde(&command.key);
    let private_key = read_to_string_ambient(Utf8Path::new(&key_path))
        .map_err(|message| CliError::Config(format!("failed to read `{key_path}`: {message}")))?;
    let target = SshTarget::new(command.address, command.user, private_key);

    let session = dial_retry(&RusshDialer::new(), &target, DialPolicy::default(), cancel).await?;
    writeln!(io::stdout(), "connected to {}", session.address())?;
    session.close().await?;
    Ok(())
}

fn parse_tags(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_owned(), value.to_owned()))
            }
            _ => Err(CliError::InvalidTag(entry.clone())),
        })
        .collect()
}

fn write_instance(mut target: impl Write, instance: &Instance) -> io::Result<()> {
    writeln!(target, "id: {}", instance.id)?;
    writeln!(target, "name: {}", instance.name)?;
    writeln!(target, "zone: {}", instance.zone)?;
    writeln!(target, "address: {}", instance.address)?;
    writeln!(target, "port: {}", instance.port)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
