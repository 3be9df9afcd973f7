//! ChurchTools command line client
//!
//! Small front end over `churchtools-client`, configured through the
//! `CHURCHTOOLS_*` environment variables.
//!
//! ```text
//! churchtools-cli probe <url>
//! churchtools-cli get <path> [key=value ...]
//! churchtools-cli pages <path> [key=value ...]
//! ```

use anyhow::{Context, Result};
use churchtools_client::{init_logging, Client, ClientConfig, LogLevel, Params};
use serde_json::Value;
use tracing::{error, info};

fn parse_params(args: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .with_context(|| format!("Expected key=value, got {:?}", arg))?;
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn usage() -> ! {
    eprintln!(
        "usage: churchtools-cli <probe <url> | get <path> [key=value ...] \
         | pages <path> [key=value ...]>"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    let level = std::env::var("CHURCHTOOLS_LOG")
        .ok()
        .map(|l| l.parse::<LogLevel>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(LogLevel::Info);
    init_logging(level)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        usage();
    };

    let config = ClientConfig::from_env()?;
    let client = Client::new(config)?;
    client.install_rate_limit_retry(None);
    client.on_unauthenticated(|info| {
        error!(url = ?info.url, "Not authenticated, check CHURCHTOOLS_LOGIN_TOKEN");
    });

    let output = match (command.as_str(), rest) {
        ("probe", [url]) => {
            let base_url = client.validate_installation(url, None, None).await?;
            info!("Installation at {} is supported", base_url);
            Value::String(base_url)
        }
        ("get", [path, params @ ..]) => client.get(path, parse_params(params)?).await?,
        ("pages", [path, params @ ..]) => {
            let items = client.get_all_pages(path, parse_params(params)?, None).await?;
            info!("Fetched {} items", items.len());
            Value::Array(items)
        }
        (other, _) => {
            eprintln!("unknown command or arguments: {}", other);
            usage();
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
