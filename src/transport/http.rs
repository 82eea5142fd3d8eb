use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::transport::{HttpResponse, RequestDescriptor, Transport};

/// `reqwest`-backed transport. Parameters are sent as query pairs for every
/// method, the same way the browser client did it.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("building http client")?;
        Ok(Self { client, timeout })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Network(format!("request timed out: {err}"))
    } else if err.is_builder() {
        FetchError::InvalidRequest(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        headers: HeaderMap,
    ) -> Result<HttpResponse, FetchError> {
        let query = descriptor.query_pairs();

        trace!(
            method = %descriptor.method(),
            url = %descriptor.url(),
            params = query.len(),
            timeout_secs = %self.timeout.as_secs(),
            "sending request"
        );

        let response = self
            .client
            .request(descriptor.method().clone(), descriptor.url())
            .query(&query)
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;

        debug!(
            status_code = %status,
            url = %descriptor.url(),
            bytes = body.len(),
            "received response"
        );

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}
