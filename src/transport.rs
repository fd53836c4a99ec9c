//! Outbound request pipeline.
//!
//! Every rating write Skipper sends goes through a [`Transport`]. The plain
//! [`HttpTransport`] talks to the network; middleware such as
//! [`crate::interceptor::RatingMutationInterceptor`] wraps another transport
//! and implements the same trait.

use anyhow::{Context, Result};
use log::debug;
use reqwest::blocking::Client;
use reqwest::{Method, Url};
use std::sync::Arc;
use std::time::Duration;

/// A request about to leave the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path component of the URL, `None` when the URL doesn't parse
    pub fn path(&self) -> Option<String> {
        Url::parse(&self.url).ok().map(|url| url.path().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        (**self).send(request)
    }
}

/// Transport backed by a blocking reqwest client
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self.http.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()
            .with_context(|| format!("Request to {} failed", request.url))?;
        let status = response.status().as_u16();
        let body = response.bytes()
            .context("Failed to read response body")?
            .to_vec();

        Ok(TransportResponse { status, body })
    }
}
