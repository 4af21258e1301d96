//! HTTP client for a remote facilitator, and the facilitator chosen from configuration.

use std::{sync::Arc, time::Duration};

use centpay_core::{
    facilitator::{
        Facilitator, MockFacilitator, PaymentRequest, SettleFailed, SettleResult, SettleSuccess,
        VerifyResult,
    },
    header::PaymentScheme,
    transport::FacilitatorPaymentRequest,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{sync::Mutex, time::Instant};
use url::Url;

/// Default HTTP timeout for facilitator requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A cached access token is refreshed this long before it actually expires.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(5);

/// Token lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// How requests to the facilitator are authenticated.
#[derive(Debug, Clone, Default)]
pub enum FacilitatorAuth {
    #[default]
    None,
    /// Static bearer token.
    ApiKey(String),
    /// OAuth 2.0 client-credentials grant against `token_url`.
    ClientCredentials {
        token_url: Url,
        client_id: String,
        client_secret: String,
        scope: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorVerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorSettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

impl From<FacilitatorVerifyResponse> for VerifyResult {
    fn from(response: FacilitatorVerifyResponse) -> Self {
        if response.is_valid {
            VerifyResult::valid(response.payer.unwrap_or_default())
        } else {
            VerifyResult::invalid(
                response
                    .invalid_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                response.payer,
            )
        }
    }
}

impl From<FacilitatorSettleResponse> for SettleResult {
    fn from(response: FacilitatorSettleResponse) -> Self {
        match (response.success, response.transaction) {
            (true, Some(transaction)) => SettleResult::Success(SettleSuccess {
                payer: response.payer.unwrap_or_default(),
                transaction,
                network: response.network.unwrap_or_default(),
            }),
            (true, None) => SettleResult::Failed(SettleFailed {
                error_reason: "missing_transaction".to_string(),
                payer: response.payer,
            }),
            (false, _) => SettleResult::Failed(SettleFailed {
                error_reason: response
                    .error_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                payer: response.payer,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteFacilitatorError {
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("Facilitator request timed out")]
    Timeout,
    #[error("HTTP request error: {0}")]
    HttpRequestError(reqwest::Error),
    #[error("Facilitator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Token acquisition failed: {0}")]
    Token(String),
}

impl From<reqwest::Error> for RemoteFacilitatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteFacilitatorError::Timeout
        } else {
            RemoteFacilitatorError::HttpRequestError(err)
        }
    }
}

/// A remote facilitator reached over HTTP.
///
/// Clones share the HTTP connection pool and the access-token cache.
#[derive(Debug, Clone)]
pub struct RemoteFacilitator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    base_url: Url,
    client: reqwest::Client,
    auth: FacilitatorAuth,
    // Held across the token fetch so concurrent callers share one refresh.
    token: Mutex<Option<CachedToken>>,
}

impl RemoteFacilitator {
    pub fn new(base_url: Url, auth: FacilitatorAuth) -> Result<Self, RemoteFacilitatorError> {
        Self::with_timeout(base_url, auth, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        mut base_url: Url,
        auth: FacilitatorAuth,
        timeout: Duration,
    ) -> Result<Self, RemoteFacilitatorError> {
        // `Url::join` replaces the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(RemoteFacilitator {
            inner: Arc::new(Inner {
                base_url,
                client,
                auth,
                token: Mutex::new(None),
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The bearer token to send, fetching or refreshing it if needed.
    async fn bearer(&self) -> Result<Option<String>, RemoteFacilitatorError> {
        match &self.inner.auth {
            FacilitatorAuth::None => Ok(None),
            FacilitatorAuth::ApiKey(key) => Ok(Some(key.clone())),
            FacilitatorAuth::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                let mut cached = self.inner.token.lock().await;
                if let Some(token) = cached.as_ref()
                    && Instant::now() < token.refresh_at
                {
                    return Ok(Some(token.value.clone()));
                }

                let token = self
                    .fetch_token(token_url, client_id, client_secret, scope.as_deref())
                    .await?;
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
        }
    }

    async fn fetch_token(
        &self,
        token_url: &Url,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<CachedToken, RemoteFacilitatorError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        tracing::debug!(url = %token_url, "Fetching facilitator access token");

        let response = self
            .inner
            .client
            .post(token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| RemoteFacilitatorError::Token(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteFacilitatorError::Token(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| RemoteFacilitatorError::Token(err.to_string()))?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &FacilitatorPaymentRequest,
    ) -> Result<T, RemoteFacilitatorError> {
        let url = self.inner.base_url.join(path)?;
        tracing::debug!(url = %url, "Calling facilitator");

        let mut request = self.inner.client.post(url).json(body);
        if let Some(token) = self.bearer().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteFacilitatorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

impl Facilitator for RemoteFacilitator {
    type Error = RemoteFacilitatorError;

    fn scheme(&self) -> PaymentScheme {
        PaymentScheme::X402
    }

    async fn verify(&self, request: &PaymentRequest) -> Result<VerifyResult, Self::Error> {
        let body = FacilitatorPaymentRequest::new(&request.credential, &request.requirements);
        let response: FacilitatorVerifyResponse = self.post("verify", &body).await?;

        if !response.is_valid {
            tracing::warn!(reason = ?response.invalid_reason, "Facilitator rejected payment");
        }
        Ok(response.into())
    }

    async fn settle(&self, request: &PaymentRequest) -> Result<SettleResult, Self::Error> {
        let body = FacilitatorPaymentRequest::new(&request.credential, &request.requirements);
        let response: FacilitatorSettleResponse = self.post("settle", &body).await?;
        Ok(response.into())
    }
}

/// The facilitator selected at startup from explicit configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredFacilitator {
    Mock(MockFacilitator),
    Remote(RemoteFacilitator),
}

impl Facilitator for ConfiguredFacilitator {
    type Error = RemoteFacilitatorError;

    fn scheme(&self) -> PaymentScheme {
        match self {
            ConfiguredFacilitator::Mock(mock) => mock.scheme(),
            ConfiguredFacilitator::Remote(remote) => remote.scheme(),
        }
    }

    async fn verify(&self, request: &PaymentRequest) -> Result<VerifyResult, Self::Error> {
        match self {
            ConfiguredFacilitator::Mock(mock) => match mock.verify(request).await {
                Ok(result) => Ok(result),
                Err(never) => match never {},
            },
            ConfiguredFacilitator::Remote(remote) => remote.verify(request).await,
        }
    }

    async fn settle(&self, request: &PaymentRequest) -> Result<SettleResult, Self::Error> {
        match self {
            ConfiguredFacilitator::Mock(mock) => match mock.settle(request).await {
                Ok(result) => Ok(result),
                Err(never) => match never {},
            },
            ConfiguredFacilitator::Remote(remote) => remote.settle(request).await,
        }
    }
}
