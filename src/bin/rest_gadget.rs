use std::{
    io::{self, Read},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use action_relay::{
    clients::remote::{RemoteClient, RemoteSettings},
    models::retry::RetryConfig,
};
use anyhow::{Context, Error, Result, anyhow};
use clap::{Parser, ValueEnum};
use reqwest::Method;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const EXIT_HTTP_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => Method::GET,
            Verb::Put => Method::PUT,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
        }
    }
}

/// Sends one request to the Resilient REST API and prints the raw response.
#[derive(Debug, Parser)]
#[command(name = "rest_gadget", version)]
struct Cli {
    /// HTTP verb
    #[arg(value_enum, ignore_case = true)]
    verb: Verb,

    /// Resource path, relative to the organisation (e.g. /incidents/42)
    path: String,

    /// JSON request body, or `-` to read it from stdin
    body: Option<String>,

    #[arg(long, env = "RESILIENT_URL")]
    url: String,

    #[arg(long, env = "RESILIENT_EMAIL")]
    email: String,

    #[arg(long, env = "RESILIENT_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, env = "RESILIENT_ORG")]
    org: Option<String>,

    /// PEM file with the certificates to trust
    #[arg(long, env = "RESILIENT_CAFILE")]
    cafile: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

impl Cli {
    fn settings(&self) -> RemoteSettings {
        RemoteSettings {
            base_url: self.url.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            org_name: self.org.clone(),
            cafile: self.cafile.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 1,
            },
        }
    }

    fn json_body(&self) -> Result<Option<Value>, Error> {
        let Some(body) = &self.body else {
            return Ok(None);
        };

        let text = if body == "-" {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read body from stdin")?;
            text
        } else {
            body.clone()
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| anyhow!("Body is not valid JSON: {}", e))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let body = match cli.json_body() {
        Ok(body) => body,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let client = match RemoteClient::new(&cli.settings()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match client.raw(cli.verb.into(), &cli.path, body.as_ref()).await {
        Ok(response) => {
            println!("{}", response.body);
            if response.is_success() {
                ExitCode::SUCCESS
            } else {
                eprintln!("HTTP {}", response.status);
                ExitCode::from(EXIT_HTTP_FAILURE)
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_HTTP_FAILURE)
        }
    }
}
