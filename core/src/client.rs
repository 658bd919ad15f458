//! Authenticated Superset REST client.
//!
//! The client owns the bearer token. Callers only see [`SupersetClient::request`];
//! login, header injection and the single re-authentication after a 401 all
//! happen in here.

use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::Credentials;
use crate::error::{ClientError, ClientResult};

pub const LOGIN_PATH: &str = "/api/v1/security/login";
const LOGIN_PROVIDER: &str = "db";

#[derive(Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

pub struct SupersetClient {
    credentials: Credentials,
    http: reqwest::Client,
    // Locked across login; at most one authentication runs at a time.
    token: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl SupersetClient {
    pub fn new(credentials: Credentials) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(credentials.timeout())
            .build()?;
        Ok(Self {
            credentials,
            http,
            token: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn has_token(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Log in and store the returned access token.
    ///
    /// Failures are logged and reported as `false`; the caller decides
    /// whether to carry on. A failed login leaves the previous token in place.
    pub async fn authenticate(&self) -> bool {
        let mut slot = self.token.lock().await;
        self.authenticate_locked(&mut slot).await
    }

    async fn authenticate_locked(&self, slot: &mut Option<String>) -> bool {
        match self.login().await {
            Ok(token) => {
                tracing::debug!(username = %self.credentials.username(), "Authenticated with Superset");
                *slot = Some(token);
                true
            }
            Err(err) => {
                tracing::error!(
                    base_url = %self.credentials.base_url(),
                    error = %err,
                    "Authentication failed"
                );
                false
            }
        }
    }

    async fn login(&self) -> ClientResult<String> {
        self.ensure_open()?;
        let url = self.url(LOGIN_PATH)?;
        let response = self
            .http
            .post(url)
            .json(&json!({
                "username": self.credentials.username(),
                "password": self.credentials.password(),
                "provider": LOGIN_PROVIDER,
                "refresh": true
            }))
            .send()
            .await?;

        let body = read_json(Method::POST, LOGIN_PATH, response).await?;
        let login: LoginResponse =
            serde_json::from_value(body).map_err(|source| ClientError::Decode {
                path: LOGIN_PATH.to_string(),
                source,
            })?;
        login
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(ClientError::MissingAccessToken)
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ClientResult<Value> {
        self.request_with_headers(method, path, body, HeaderMap::new())
            .await
    }

    /// Like [`Self::request`], with extra headers. The bearer header always
    /// replaces any caller-supplied `Authorization`.
    pub async fn request_with_headers(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        mut headers: HeaderMap,
    ) -> ClientResult<Value> {
        self.ensure_open()?;
        let url = self.url(path)?;
        headers.remove(AUTHORIZATION);

        tracing::debug!(%method, path, "Superset API request");
        let token = self.current_token().await;
        let response = self
            .send(method.clone(), url.clone(), body, &headers, token.as_deref())
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(%method, path, "Superset rejected token, re-authenticating");
            let token = self.reauthenticate(token.as_deref()).await;
            self.send(method.clone(), url, body, &headers, token.as_deref())
                .await?
        } else {
            response
        };

        read_json(method, path, response).await
    }

    /// Stop issuing requests and drop the token.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.lock().await.take();
        tracing::debug!("Superset client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn current_token(&self) -> Option<String> {
        let mut slot = self.token.lock().await;
        if slot.is_none() {
            // Result unchecked: a missing token surfaces as a 401 below.
            self.authenticate_locked(&mut slot).await;
        }
        slot.clone()
    }

    async fn reauthenticate(&self, rejected: Option<&str>) -> Option<String> {
        let mut slot = self.token.lock().await;
        if slot.is_some() && slot.as_deref() != rejected {
            return slot.clone();
        }
        self.authenticate_locked(&mut slot).await;
        slot.clone()
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        headers: &HeaderMap,
        token: Option<&str>,
    ) -> ClientResult<Response> {
        let mut request = self.http.request(method, url).headers(headers.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        let trimmed = path.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Err(ClientError::InvalidUrl {
                path: path.to_string(),
                reason: "pass an API path, not a full URL".to_string(),
            });
        }
        let path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Url::parse(&format!("{}{}", self.credentials.base_url(), path)).map_err(|e| {
            ClientError::InvalidUrl {
                path,
                reason: e.to_string(),
            }
        })
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

async fn read_json(method: Method, path: &str, response: Response) -> ClientResult<Value> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(ClientError::Status {
            status,
            method,
            path: path.to_string(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
        path: path.to_string(),
        source,
    })
}
