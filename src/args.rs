use std::path::PathBuf;

use clap::{ArgAction, Parser};


/// Look up one account in the directory and write it out as JSON.
///
/// Connection settings come from `LDAP_OU_*` environment variables (a `.env`
/// file is honored).
#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
#[command(version)]
pub struct Opts {
    /// Where to write the search result.
    #[arg(short = 'o', long, default_value = "data/ldap-search.json")]
    pub output: PathBuf,

    /// Where to write the schema dump when LDAP_OU_SCHEMA is set.
    #[arg(short = 's', long, default_value = "data/ldap-schema.txt")]
    pub schema_output: PathBuf,

    /// Load variables from this file instead of ./.env.
    #[arg(short = 'e', long)]
    pub env_file: Option<PathBuf>,

    /// TOML file with `bind_dn` and `password`, taking precedence over the environment.
    #[arg(short = 'c', long)]
    pub credentials_file: Option<PathBuf>,

    /// Ask for the bind password on the terminal if none is configured.
    #[arg(short = 'p', long)]
    pub prompt_password: bool,

    /// -v logs the effective configuration, -vv also the full result.
    #[arg(short = 'v', long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only report errors.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}
impl Opts {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::VeryVerbose,
        }
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}
impl Verbosity {
    pub fn level(&self) -> tracing::Level {
        match self {
            Self::Quiet => tracing::Level::ERROR,
            Self::Normal => tracing::Level::INFO,
            Self::Verbose => tracing::Level::DEBUG,
            Self::VeryVerbose => tracing::Level::TRACE,
        }
    }
}
