use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::blocklist::{BlockRecord, FilterRebuilder};
use crate::config::SentinelConfig;
use crate::core::http::{HttpRequest, HttpResponse, RequestContext};
use crate::detectors::DetectorRegistry;
use crate::storage::{KvStore, MemoryCache, MemoryKv, MemoryQueue};
use crate::utils::error::{Result, SentinelError};
use crate::{build_pipeline, Stores, VERSION};

const APP_NAME: &str = "sentinel-cli";
const APP_ABOUT: &str = "Run requests through the Sentinel WAF core and inspect decisions";

/// Rule-testing and operations CLI over the in-memory backend.
#[derive(Debug, Parser)]
#[command(name = APP_NAME, about = APP_ABOUT, version = VERSION)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one request through the pipeline and print the decision.
    Inspect {
        /// Request path with optional query string.
        url: String,

        /// HTTP method.
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Headers as `name: value` pairs, repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body; content type taken from the headers.
        #[arg(short, long)]
        body: Option<String>,

        /// Client IP for blocklist, rate, and reputation keys.
        #[arg(long)]
        ip: Option<IpAddr>,

        /// Preload blocklist entries as `key=reason`, repeatable.
        #[arg(long = "blocked")]
        blocked: Vec<String>,

        /// Also run the response phase against this status code.
        #[arg(long)]
        status: Option<u16>,
    },

    /// List the built-in detectors.
    Detectors,

    /// Seed block records from a JSON object (`{"key": "reason"}`) and run
    /// a filter rebuild, printing the summary.
    Rebuild {
        /// Path to the seed file.
        #[arg(short, long)]
        seed: PathBuf,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SentinelConfig::load(Some(path))?,
        None => SentinelConfig::default(),
    };

    match cli.command {
        Command::Inspect {
            url,
            method,
            headers,
            body,
            ip,
            blocked,
            status,
        } => inspect(&config, &url, &method, &headers, body, ip, &blocked, status).await,
        Command::Detectors => {
            for name in DetectorRegistry::builtin_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Rebuild { seed } => rebuild(&config, &seed).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn inspect(
    config: &SentinelConfig,
    url: &str,
    method: &str,
    headers: &[String],
    body: Option<String>,
    ip: Option<IpAddr>,
    blocked: &[String],
    status: Option<u16>,
) -> Result<()> {
    let kv = Arc::new(MemoryKv::new());
    for entry in blocked {
        let (key, reason) = entry
            .split_once('=')
            .ok_or_else(|| SentinelError::validation(format!("expected key=reason: {entry}")))?;
        let record = BlockRecord::new(reason, config.blocklist.block_ttl_secs);
        kv.put(
            &format!("{}{}", config.blocklist.key_prefix, key),
            record.to_bytes()?,
            Some(config.blocklist.block_ttl()),
        )
        .await?;
    }

    let stores = Stores::new(
        kv,
        Arc::new(MemoryCache::new()),
        Arc::new(MemoryQueue::new()),
    );
    let pipeline = build_pipeline(config, &stores)?;

    let mut request = HttpRequest::new(method, url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| SentinelError::validation(format!("expected name: value: {header}")))?;
        request = request.with_header(name.trim(), value.trim().to_string());
    }
    if let Some(body) = body {
        let content_type = request
            .content_type()
            .unwrap_or_else(|| "application/json".to_string());
        request = request.with_body(&content_type, body.into_bytes());
    }
    if let Some(ip) = ip {
        request = request.with_remote_addr(ip);
    }

    let context = RequestContext::new();
    let decision = pipeline.process(&request, &context).await;
    println!("{}", serde_json::to_string_pretty(&decision).unwrap_or_default());

    if let Some(status) = status {
        let response = HttpResponse::new(status);
        let decision = pipeline.process_response(&request, &response, &context).await;
        println!("{}", serde_json::to_string_pretty(&decision).unwrap_or_default());
    }
    Ok(())
}

async fn rebuild(config: &SentinelConfig, seed: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(seed)
        .map_err(|e| SentinelError::validation(format!("seed file unreadable: {e}")))?;
    let entries: HashMap<String, String> = serde_json::from_str(&raw)
        .map_err(|e| SentinelError::serialization("seed file", e))?;

    let kv = Arc::new(MemoryKv::new());
    for (key, reason) in &entries {
        let record = BlockRecord::new(reason, config.blocklist.block_ttl_secs);
        kv.put(
            &format!("{}{}", config.blocklist.key_prefix, key),
            record.to_bytes()?,
            Some(config.blocklist.block_ttl()),
        )
        .await?;
    }
    info!(seeded = entries.len(), "seed records loaded");

    let rebuilder = FilterRebuilder::new(kv, config.blocklist.clone());
    let summary = rebuilder.rebuild().await?;
    println!(
        "scanned={} inserted={} skipped_expired={} capacity_drops={} version={}",
        summary.scanned,
        summary.inserted,
        summary.skipped_expired,
        summary.capacity_drops,
        summary.version
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_inspect_invocation() {
        let cli = Cli::parse_from([
            "sentinel-cli",
            "inspect",
            "/search?q=1",
            "--method",
            "POST",
            "-H",
            "content-type: application/json",
            "--body",
            "{\"a\":1}",
            "--blocked",
            "1.2.3.4=Spam",
        ]);
        match cli.command {
            Command::Inspect {
                url,
                method,
                headers,
                blocked,
                ..
            } => {
                assert_eq!(url, "/search?q=1");
                assert_eq!(method, "POST");
                assert_eq!(headers.len(), 1);
                assert_eq!(blocked, vec!["1.2.3.4=Spam"]);
            }
            _ => unreachable!(),
        }
    }
}
