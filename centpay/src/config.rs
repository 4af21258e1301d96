//! Command-line and environment configuration for the binaries.

use std::time::Duration;

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use centpay_core::{
    facilitator::MockFacilitator,
    invoice::{AssetInfo, InvoiceTerms},
};
use url::Url;

use crate::{
    authorizer::{AuthorizerError, ConfiguredAuthorizer, MockAuthorizer, PolicyAuthorizer},
    facilitator_client::{
        ConfiguredFacilitator, FacilitatorAuth, RemoteFacilitator, RemoteFacilitatorError,
    },
};

pub const DEFAULT_FACILITATOR_URL: &str = "https://api.demo-facilitator.invalid/x402/facilitator";

/// USDC on Base Sepolia.
pub const DEFAULT_ASSET_ADDRESS: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        source: url::ParseError,
    },
    #[error("{0} is required when the mock is disabled")]
    Missing(&'static str),
    #[error("Facilitator client error: {0}")]
    Facilitator(#[from] RemoteFacilitatorError),
    #[error("Authorizer error: {0}")]
    Authorizer(#[from] AuthorizerError),
    #[error("Unpayable price: {0}")]
    Price(#[from] centpay_core::errors::Error),
}

/// Paywalled joke server.
#[derive(Parser, Debug, Clone)]
#[command(name = "centpay-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Price of one joke in minor units.
    #[arg(long, env = "JOKE_PRICE_CENTS", default_value_t = 1)]
    pub price_cents: u64,

    #[arg(long, env = "JOKE_CURRENCY", default_value = "USDC")]
    pub currency: String,

    #[arg(long, env = "JOKE_NETWORK", default_value = "base-sepolia")]
    pub network: String,

    #[arg(long, env = "FACILITATOR_URL", default_value = DEFAULT_FACILITATOR_URL)]
    pub facilitator_url: String,

    /// Seller identifier; also the payment destination.
    #[arg(long, env = "SELLER_ID", default_value = "demo.seller")]
    pub seller_id: String,

    #[arg(long, env = "SELLER_NAME", default_value = "1¢ Joke Agent")]
    pub seller_name: String,

    #[arg(long, env = "POLICY_LABEL", default_value = "daily-$1")]
    pub policy_label: String,

    /// Accept every `demo` credential instead of calling a remote facilitator.
    #[arg(
        long,
        env = "MOCK_FACILITATOR",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub mock_facilitator: bool,

    #[arg(long, env = "INVOICE_TTL_MS", default_value_t = 120_000)]
    pub invoice_ttl_ms: u64,

    #[arg(long, env = "ASSET_ADDRESS", default_value = DEFAULT_ASSET_ADDRESS)]
    pub asset_address: String,

    #[arg(long, env = "ASSET_DECIMALS", default_value_t = 6)]
    pub asset_decimals: u8,

    /// Canonical URL of the joke resource. Defaults to `http://localhost:<port><path>`.
    #[arg(long, env = "RESOURCE_URL")]
    pub resource_url: Option<String>,

    #[arg(long, env = "JOKE_PATH", default_value = "/joke")]
    pub path: String,

    /// Value of `Access-Control-Allow-Origin`.
    #[arg(long, env = "ALLOWED_ORIGIN", default_value = "*")]
    pub allowed_origin: String,

    #[arg(long, default_value_t = 30)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "FACILITATOR_API_KEY", hide_env_values = true)]
    pub facilitator_api_key: Option<String>,

    #[arg(long, env = "FACILITATOR_TOKEN_URL")]
    pub facilitator_token_url: Option<String>,

    #[arg(long, env = "FACILITATOR_CLIENT_ID")]
    pub facilitator_client_id: Option<String>,

    #[arg(long, env = "FACILITATOR_CLIENT_SECRET", hide_env_values = true)]
    pub facilitator_client_secret: Option<String>,

    #[arg(long, env = "FACILITATOR_SCOPE")]
    pub facilitator_scope: Option<String>,

    #[arg(long, default_value_t = 15)]
    pub facilitator_timeout_secs: u64,
}

impl ServerConfig {
    pub fn invoice_terms(&self) -> Result<InvoiceTerms, ConfigError> {
        let resource = match &self.resource_url {
            Some(url) => parse_url("resource_url", url)?,
            None => parse_url(
                "resource_url",
                &format!("http://localhost:{}{}", self.port, self.path),
            )?,
        };
        let scheme = if self.mock_facilitator { "demo" } else { "exact" };

        let terms = InvoiceTerms::builder()
            .price_cents(self.price_cents)
            .currency(self.currency.clone())
            .network(self.network.clone())
            .scheme(scheme)
            .facilitator_url(parse_url("facilitator_url", &self.facilitator_url)?)
            .pay_to(self.seller_id.clone())
            .seller_name(self.seller_name.clone())
            .policy_label(self.policy_label.clone())
            .asset(AssetInfo {
                address: self.asset_address.clone(),
                decimals: self.asset_decimals,
                symbol: self.currency.clone(),
            })
            .resource(resource)
            .ttl(Duration::from_millis(self.invoice_ttl_ms))
            .build();
        terms.atomic_price()?;
        Ok(terms)
    }

    pub fn facilitator_auth(&self) -> Result<FacilitatorAuth, ConfigError> {
        if let Some(token_url) = &self.facilitator_token_url {
            return Ok(FacilitatorAuth::ClientCredentials {
                token_url: parse_url("facilitator_token_url", token_url)?,
                client_id: self
                    .facilitator_client_id
                    .clone()
                    .ok_or(ConfigError::Missing("FACILITATOR_CLIENT_ID"))?,
                client_secret: self
                    .facilitator_client_secret
                    .clone()
                    .ok_or(ConfigError::Missing("FACILITATOR_CLIENT_SECRET"))?,
                scope: self.facilitator_scope.clone(),
            });
        }
        Ok(self
            .facilitator_api_key
            .clone()
            .map(FacilitatorAuth::ApiKey)
            .unwrap_or_default())
    }

    pub fn facilitator(&self) -> Result<ConfiguredFacilitator, ConfigError> {
        if self.mock_facilitator {
            return Ok(ConfiguredFacilitator::Mock(MockFacilitator::default()));
        }
        let remote = RemoteFacilitator::with_timeout(
            parse_url("facilitator_url", &self.facilitator_url)?,
            self.facilitator_auth()?,
            Duration::from_secs(self.facilitator_timeout_secs),
        )?;
        Ok(ConfiguredFacilitator::Remote(remote))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Agent that buys a joke.
#[derive(Parser, Debug, Clone)]
#[command(name = "centpay-agent")]
#[command(author, version, about, long_about = None)]
pub struct AgentConfig {
    /// What the agent is asked to do; sent to the authorizer as the memo.
    #[arg(default_value = "tell me a joke")]
    pub prompt: Vec<String>,

    #[arg(long, env = "JOKE_API_URL", default_value = "http://localhost:3000/joke")]
    pub api_url: String,

    /// Approve every spend locally instead of asking the policy engine.
    #[arg(
        long,
        env = "MOCK_LOCUS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub mock_policy: bool,

    #[arg(long, env = "POLICY_API_URL")]
    pub policy_url: Option<String>,

    #[arg(long, env = "POLICY_API_KEY", hide_env_values = true)]
    pub policy_api_key: Option<String>,

    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,
}

impl AgentConfig {
    pub fn memo(&self) -> String {
        self.prompt.join(" ")
    }

    pub fn resource_url(&self) -> Result<Url, ConfigError> {
        parse_url("api_url", &self.api_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn authorizer(&self) -> Result<ConfiguredAuthorizer, ConfigError> {
        if self.mock_policy {
            return Ok(ConfiguredAuthorizer::Mock(MockAuthorizer::default()));
        }
        let base = self
            .policy_url
            .as_deref()
            .ok_or(ConfigError::Missing("POLICY_API_URL"))?;
        let policy = PolicyAuthorizer::with_timeout(
            parse_url("policy_url", base)?,
            self.policy_api_key.clone(),
            self.timeout(),
        )?;
        Ok(ConfiguredAuthorizer::Policy(policy))
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })
}
