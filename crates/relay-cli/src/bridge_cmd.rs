//! CLI commands for `relay call` and `relay list`.

use anyhow::Result;
use clap::{Args, Parser};
use relay_bridges::{AnyClient, DEFAULT_MAX_PAGES};
use relay_core::{BridgeConfig, CallContext, RelayConfig, RelayError};
use relay_proto::{Method, ProviderId, Request};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::ConfigError;
use crate::duration::parse_duration;

/// Connection options shared by `call` and `list`.
#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Provider id or alias: cloudflare (cf), google-places (places), youtube (yt),
    /// google-play (play), appstore (apple)
    pub provider: String,

    /// YAML file with a `bridges:` section per provider
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// API key, overriding the config file and RELAY_<PROVIDER>_API_KEY
    #[arg(long, env = "RELAY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Bearer token, overriding the config file and RELAY_<PROVIDER>_TOKEN
    #[arg(long, env = "RELAY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL override
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Retries for safe methods on transport errors, 429 and 5xx
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Append JSONL audit records to this file
    #[arg(long, value_name = "FILE")]
    pub audit_log: Option<PathBuf>,

    /// Account alias recorded in the audit log and used as rate-limit subject
    #[arg(long)]
    pub account: Option<String>,

    /// Skip the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Overall deadline for the command, e.g. 30s
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    pub deadline: Option<Duration>,
}

impl BridgeArgs {
    pub fn provider_id(&self) -> Result<ProviderId> {
        Ok(self
            .provider
            .parse::<ProviderId>()
            .map_err(|e| ConfigError(e.to_string()))?)
    }

    /// Command-line values first, then the config file, then the environment.
    pub fn bridge_config(&self, provider: ProviderId) -> Result<BridgeConfig> {
        let mut flags = BridgeConfig {
            api_key: self.api_key.clone(),
            token: self.token.clone(),
            base_url: self.base_url.clone(),
            log_path: self.audit_log.clone(),
            max_retries: self.max_retries.unwrap_or(0),
            disable_cache: self.no_cache,
            ..BridgeConfig::default()
        };
        if let Some(account) = self.account.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            flags
                .log_context
                .insert("account_alias".to_string(), account.to_string());
        }

        let file = match &self.config {
            Some(path) => RelayConfig::from_file(path)?.bridge(provider),
            None => BridgeConfig::default(),
        };
        let env = BridgeConfig::from_env(provider)?;
        Ok(flags.merged_over(&file).merged_over(&env))
    }

    fn client(&self) -> Result<AnyClient> {
        let provider = self.provider_id()?;
        let config = self.bridge_config(provider)?;
        debug!(provider = %provider, config = ?config, "bridge configured");
        Ok(AnyClient::from_config(provider, &config)?)
    }

    /// Cancelled on Ctrl-C, bounded by `--deadline`.
    fn context(&self) -> CallContext {
        let mut ctx = CallContext::new();
        if let Some(deadline) = self.deadline {
            ctx = ctx.with_timeout(deadline);
        }
        let cancel = ctx.cancel_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        ctx
    }
}

/// Request shape shared by `call` and `list`.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Query parameter (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Extra request header (repeatable)
    #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub headers: Vec<(String, String)>,

    /// JSON request body
    #[arg(long, value_name = "BODY", conflicts_with = "body_file")]
    pub json: Option<String>,

    /// File sent as an application/octet-stream media body
    #[arg(long, value_name = "FILE")]
    pub body_file: Option<PathBuf>,

    /// Response field mask (Google Places)
    #[arg(long, value_name = "MASK")]
    pub field_mask: Option<String>,

    /// Use the provider's upload base URL
    #[arg(long)]
    pub upload: bool,

    /// Use the provider's custom-app base URL (Google Play)
    #[arg(long)]
    pub custom_app: bool,
}

impl RequestArgs {
    pub fn build(&self, method: Method, path: &str) -> Result<Request> {
        let mut request = Request::new(method, path);
        for (key, value) in &self.params {
            request.set_param(key, value);
        }
        for (key, value) in &self.headers {
            request = request.header(key, value.clone());
        }
        if let Some(raw) = &self.json {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| ConfigError(format!("--json is not valid JSON: {e}")))?;
            request = request.json(value);
        }
        if let Some(path) = &self.body_file {
            request = request.media_file(path.clone());
        }
        if let Some(mask) = self.field_mask.as_deref().filter(|m| !m.trim().is_empty()) {
            request = request.field_mask(mask);
        }
        if self.upload {
            request = request.upload();
        }
        if self.custom_app {
            request = request.custom_app_base();
        }
        Ok(request)
    }
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Issue one request and print the normalized response.
#[derive(Parser, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// HTTP method
    pub method: String,

    /// Path relative to the provider base URL, or an absolute URL
    pub path: String,

    #[command(flatten)]
    pub request: RequestArgs,
}

/// Follow pagination and print every item as one JSON array.
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// Path relative to the provider base URL, or an absolute URL
    pub path: String,

    /// Stop after this many pages
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    #[command(flatten)]
    pub request: RequestArgs,
}

pub async fn call(args: CallArgs) -> Result<()> {
    let method = args
        .method
        .parse::<Method>()
        .map_err(|e| ConfigError(e.to_string()))?;
    let request = args.request.build(method, &args.path)?;
    let client = args.bridge.client()?;
    let ctx = args.bridge.context();

    let result = client.call(request, &ctx).await;
    client.flush();
    match result {
        Ok(response) => {
            info!(
                provider = %client.provider(),
                status = response.status_code,
                from_cache = response.from_cache,
                "call finished"
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => report_failure(err),
    }
}

pub async fn list(args: ListArgs) -> Result<()> {
    let request = args.request.build(Method::Get, &args.path)?;
    let client = args.bridge.client()?;
    let ctx = args.bridge.context();

    let result = client.list_all(request, args.max_pages, &ctx).await;
    client.flush();
    match result {
        Ok(items) => {
            info!(provider = %client.provider(), items = items.len(), "list finished");
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(())
        }
        Err(err) => report_failure(err),
    }
}

/// Provider errors go to stderr as JSON with exit code 1; anything else is
/// returned for the generic handler.
fn report_failure(err: RelayError) -> Result<()> {
    if let RelayError::Api(api) = &err {
        eprintln!("{}", serde_json::to_string_pretty(api)?);
        std::process::exit(1);
    }
    Err(err.into())
}
