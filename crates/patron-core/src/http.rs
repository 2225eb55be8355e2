//! HTTP client interface
//!
//! The controller talks to libraries through the [`Http`] trait so tests can
//! script responses. [`ReqwestHttp`] is the production implementation.
//!
//! Results are three-way: a successful response, an error status from the
//! server, or an exception (the request never completed). Timeouts belong
//! to the implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::credentials::HttpAuth;

/// Outcome of an HTTP request
#[derive(Debug)]
pub enum HttpResult<T> {
    /// 2xx response
    Ok(T),
    /// The server answered with a non-2xx status
    Error { status: u16, message: String },
    /// The request could not be completed
    Exception(anyhow::Error),
}

impl<T> HttpResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, HttpResult::Ok(_))
    }
}

/// Response metadata of a HEAD request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// Complete response of a GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBody {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP operations used by the controller
#[async_trait]
pub trait Http: Send + Sync {
    async fn head(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpHead>;

    async fn get(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpBody>;
}

/// Attach patron authentication to a request
pub(crate) fn authorize(
    request: reqwest::RequestBuilder,
    auth: Option<&HttpAuth>,
) -> reqwest::RequestBuilder {
    match auth {
        Some(HttpAuth::Basic { user, password }) => request.basic_auth(user, Some(password)),
        Some(HttpAuth::Bearer(token)) => request.bearer_auth(token),
        None => request,
    }
}

pub(crate) fn header_str(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// [`Http`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    /// Build a client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("patron/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Http for ReqwestHttp {
    async fn head(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpHead> {
        debug!(%uri, "HEAD");
        let request = authorize(self.client.head(uri.clone()), auth);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return HttpResult::Exception(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            return HttpResult::Error {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            };
        }

        HttpResult::Ok(HttpHead {
            status: status.as_u16(),
            content_type: header_str(&response, CONTENT_TYPE),
            content_length: header_str(&response, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
        })
    }

    async fn get(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpBody> {
        debug!(%uri, "GET");
        let request = authorize(self.client.get(uri.clone()), auth);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return HttpResult::Exception(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("").to_string();
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.trim().is_empty())
                .unwrap_or(reason);
            return HttpResult::Error {
                status: status.as_u16(),
                message,
            };
        }

        let content_type = header_str(&response, CONTENT_TYPE);
        match response.bytes().await {
            Ok(body) => HttpResult::Ok(HttpBody {
                status: status.as_u16(),
                content_type,
                body: body.to_vec(),
            }),
            Err(e) => HttpResult::Exception(e.into()),
        }
    }
}
