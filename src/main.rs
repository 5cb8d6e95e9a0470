mod args;
mod config;
mod directory;
mod error;
mod ldap;
mod lookup;
mod output;
mod schema;
mod summary;


use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Opts, Verbosity};
use crate::config::{ChainProvider, ConfigProvider, Credentials, EnvProvider, LookupConfig, StaticProvider, KEY_PASS};
use crate::error::{Error, Result};
use crate::ldap::LdapConnection;
use crate::summary::AccountSummary;


/// `RUST_LOG` wins over the verbosity flags when it parses.
fn env_filter(rust_log: Option<&str>, verbosity: Verbosity) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(verbosity.level().to_string()))
}

fn init_tracing(verbosity: Verbosity) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref(), verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}


fn load_dotenv(opts: &Opts) -> Result<()> {
    match &opts.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| Error::ConfigInvalid {
                    key: "env file",
                    reason: format!("failed to load {}: {}", path.display(), e),
                })?;
            debug!(path = %path.display(), "loaded environment file");
        },
        None => {
            if let Ok(path) = dotenvy::dotenv() {
                debug!(path = %path.display(), "loaded environment file");
            }
        },
    }
    Ok(())
}


fn build_provider(opts: &Opts) -> Result<ChainProvider> {
    let mut base = ChainProvider::new();
    if let Some(credentials_file) = &opts.credentials_file {
        base.push(Credentials::load(credentials_file)?);
    }
    base.push(EnvProvider);

    if !opts.prompt_password || base.get(KEY_PASS).is_some() {
        return Ok(base);
    }

    let password = rpassword::prompt_password("LDAP password: ")
        .map_err(|e| Error::ConfigInvalid {
            key: KEY_PASS,
            reason: format!("failed to read password from terminal: {}", e),
        })?;
    let mut chain = ChainProvider::new();
    chain.push(StaticProvider::new().with(KEY_PASS, password));
    chain.push(base);
    Ok(chain)
}


async fn run(opts: &Opts) -> Result<()> {
    load_dotenv(opts)?;
    let provider = build_provider(opts)?;
    let config = LookupConfig::resolve(&provider)?;
    if opts.verbosity() >= Verbosity::Verbose {
        info!(?config, "effective configuration");
    }

    let request = config.request();
    let mut connection = LdapConnection::connect(&config).await?;
    let result = lookup::run_lookup(
        &mut connection,
        &request,
        |schema| output::write_schema(&opts.schema_output, schema),
    ).await?;

    match AccountSummary::from_result(&result) {
        Some(summary) => info!(
            account = summary.account_name.as_deref().unwrap_or("-"),
            account_type = summary.account_type.as_deref().unwrap_or("-"),
            last_logon_raw = summary.last_logon_raw.as_deref().unwrap_or("-"),
            last_logon = ?summary.last_logon,
            fingerprint = summary.fingerprint.as_deref().unwrap_or("-"),
            "found account",
        ),
        None => warn!(identifier = %request.query.identifier, "no matching entry"),
    }
    if opts.verbosity() >= Verbosity::VeryVerbose {
        debug!(result = ?result, "full search result");
    }

    output::write_result(&opts.output, &result)
}


#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    init_tracing(opts.verbosity());

    match run(&opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        },
    }
}
