//! Batch client for the profile RPC endpoint.
//!
//! One batch is one form-encoded POST. Cookies are kept between batches, redirects are followed
//! by re-posting the batch, and connection-level failures are retried a bounded number of times.

use async_trait::async_trait;
use chrono::{Local, Timelike};
use log::debug;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_TYPE, LOCATION, REFERER};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tokio::time::sleep;

use profile_mirror_core::rpc::{encode_batch, RpcCall, RpcResponse, Transport};

use crate::error::{Result, RetryClass, RpcError};

/// Default timeout for one request attempt.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const RETRY_BASE_BACKOFF_MS: u64 = 200;
const RETRY_MAX_BACKOFF_MS: u64 = 2_000;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Redirects plus transient retries allowed per batch, on top of the first attempt.
pub const MAX_FOLLOW_UPS: usize = 3;

pub const USER_AGENT: &str = concat!("ProfileMirror/", env!("CARGO_PKG_VERSION"));

fn retry_backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff =
        (RETRY_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(RETRY_MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// Simulator pairing; sent with every batch when both fields are non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorSession {
    pub user_name: String,
    pub mobile_session_id: String,
}

impl SimulatorSession {
    fn is_complete(&self) -> bool {
        !self.user_name.is_empty() && !self.mobile_session_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcClientOptions {
    /// Application identifier, used as referrer host and `overruleReferrer`.
    pub app_id: String,
    pub request_timeout: Duration,
    pub simulator: Option<SimulatorSession>,
}

impl RpcClientOptions {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            simulator: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_simulator(
        mut self,
        user_name: impl Into<String>,
        mobile_session_id: impl Into<String>,
    ) -> Self {
        self.simulator = Some(SimulatorSession {
            user_name: user_name.into(),
            mobile_session_id: mobile_session_id.into(),
        });
        self
    }
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    options: RpcClientOptions,
}

impl RpcClient {
    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[ProfileRpc] Response {}: {}", status, truncate(body));
        } else {
            debug!("[ProfileRpc] Response error ({}): {}", status, truncate(body));
        }
    }

    pub fn new(options: RpcClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &RpcClientOptions {
        &self.options
    }

    fn headers(&self, screen_name: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        let referrer = format!("app://{}/{}", self.options.app_id, screen_name);
        let referrer = HeaderValue::from_str(&referrer)
            .map_err(|_| RpcError::invalid_request(format!("Invalid referrer '{}'", referrer)))?;
        headers.insert(REFERER, referrer);
        Ok(headers)
    }

    /// Form body: the encoded batch, the app id, optional simulator pairing and the local time.
    pub fn request_body(&self, calls: &[RpcCall]) -> Result<String> {
        let requests = encode_batch(calls).map_err(|e| RpcError::invalid_request(e.to_string()))?;
        let mut body = format!(
            "requests={}&overruleReferrer={}",
            urlencoding::encode(&requests),
            urlencoding::encode(&self.options.app_id)
        );
        if let Some(simulator) = self.options.simulator.as_ref().filter(|s| s.is_complete()) {
            body.push_str(&format!(
                "&username={}&mobileSessionId={}",
                urlencoding::encode(&simulator.user_name),
                urlencoding::encode(&simulator.mobile_session_id)
            ));
        }
        let now = Local::now();
        body.push_str(&format!("&time={}:{}", now.hour(), now.minute()));
        Ok(body)
    }

    /// Posts a batch and returns the raw body of the final 200 response.
    pub async fn post_batch(
        &self,
        endpoint: &str,
        calls: &[RpcCall],
        screen_name: &str,
    ) -> Result<String> {
        let body = self.request_body(calls)?;
        let headers = self.headers(screen_name)?;
        let mut url = Url::parse(endpoint).map_err(|e| {
            RpcError::invalid_request(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;
        let mut follow_ups = 0usize;

        loop {
            let send_result = self
                .client
                .post(url.clone())
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match send_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_redirection() {
                        let target = redirect_target(&url, response.headers())?;
                        if follow_ups >= MAX_FOLLOW_UPS {
                            return Err(RpcError::TooManyRedirects(target.to_string()));
                        }
                        follow_ups += 1;
                        debug!("[ProfileRpc] Redirect {} to {}", follow_ups, target);
                        url = target;
                        continue;
                    }

                    let text = response.text().await?;
                    Self::log_response(status, &text);
                    if status != StatusCode::OK {
                        return Err(RpcError::api(
                            status.as_u16(),
                            format!("Request failed: {}", truncate(&text)),
                        ));
                    }
                    return Ok(text);
                }
                Err(err) => {
                    let err = RpcError::Http(err);
                    let retryable = err.retry_class() == RetryClass::Retryable;
                    if retryable && follow_ups < MAX_FOLLOW_UPS {
                        follow_ups += 1;
                        let backoff = retry_backoff_with_jitter(follow_ups);
                        debug!(
                            "[ProfileRpc] Retry attempt {}/{} after transport error: {}",
                            follow_ups, MAX_FOLLOW_UPS, err
                        );
                        sleep(backoff).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RpcClient {
    async fn execute(
        &self,
        endpoint: &str,
        calls: &[RpcCall],
        screen_name: &str,
    ) -> profile_mirror_core::Result<RpcResponse> {
        let body = self.post_batch(endpoint, calls, screen_name).await?;
        RpcResponse::from_body(&body)
    }
}

fn redirect_target(current: &Url, headers: &HeaderMap) -> Result<Url> {
    let location = headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| RpcError::Malformed("Redirect without Location header".to_string()))?;
    current
        .join(location)
        .map_err(|e| RpcError::invalid_request(format!("Invalid redirect '{}': {}", location, e)))
}

fn truncate(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}
