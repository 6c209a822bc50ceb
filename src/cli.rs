// command line interface

use crate::config::{LogFormat, ServerConfig, load_policy};
use crate::core::{PoolSettings, validate};
use crate::output::Output;
use crate::{Server, logging};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "querygate",
    version,
    about = "Ask your database questions in plain english, behind a sql safety gate"
)]
struct Cli {
    /// safety policy file (.toml or .json)
    #[arg(long, env = "QUERYGATE_POLICY", global = true)]
    policy: Option<PathBuf>,

    /// force strict mode on or off, overriding the policy file
    #[arg(long, env = "SQL_SAFETY_STRICT_MODE", global = true, value_parser = BoolishValueParser::new())]
    strict_mode: Option<bool>,

    /// log level for querygate (RUST_LOG takes precedence)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// start the http api
    Serve {
        /// database connection url (postgres://)
        #[arg(long, short, env = "DATABASE_URL")]
        db: String,

        /// port number
        #[arg(long, short, default_value = "5000")]
        port: u16,

        /// host to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// api key for the sql generator
        #[arg(long, short = 'k')]
        api_key: Option<String>,

        /// minimum pooled connections
        #[arg(long, env = "DB_MIN_POOL", default_value = "2")]
        min_pool: u32,

        /// maximum pooled connections
        #[arg(long, env = "DB_MAX_POOL", default_value = "10")]
        max_pool: u32,
    },

    /// validate sql against the policy without running it
    Check {
        /// sql to check, read from stdin when omitted
        sql: Option<String>,

        /// print the verdict as json
        #[arg(long)]
        json: bool,
    },

    /// print the effective policy as toml
    Policy,
}

/// Exit status of `check` when the sql is denied.
const DENIED: u8 = 2;

pub async fn run() -> Result<ExitCode> {
    // a missing .env is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    let policy = load_policy(cli.policy.as_deref(), cli.strict_mode)?;

    match cli.command {
        Commands::Serve {
            db,
            port,
            host,
            api_key,
            min_pool,
            max_pool,
        } => {
            if min_pool > max_pool {
                return Err(miette::miette!(
                    "DB_MIN_POOL ({min_pool}) is larger than DB_MAX_POOL ({max_pool})"
                ));
            }
            let config = ServerConfig {
                host,
                port,
                database_url: db,
                pool: PoolSettings {
                    min_connections: min_pool,
                    max_connections: max_pool,
                },
                api_key,
                policy,
            };
            Server::run(config).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { sql, json } => {
            let sql = match sql {
                Some(sql) => sql,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).into_diagnostic()?;
                    buf
                }
            };

            let verdict = validate(&sql, &policy);
            if json {
                Output::raw(&verdict)?;
            } else {
                Output::pretty(&verdict);
            }

            Ok(if verdict.is_safe {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(DENIED)
            })
        }

        Commands::Policy => {
            Output::policy(&policy)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
