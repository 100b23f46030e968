//! Request builder shared by every remote call

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::{ApiError, Result};

/// Round-trip limit used until a caller sets its own
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

enum Body {
    Json(Vec<u8>),
    Multipart(Form),
}

/// Status and body of a completed round trip
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Helper for building and executing a single HTTP request
pub(crate) struct FetchBuilder<'a> {
    client: &'a Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Duration,
}

impl<'a> FetchBuilder<'a> {
    pub fn new(client: &'a Client, url: String, method: Method) -> Self {
        Self {
            client,
            url,
            method,
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach the session token as the `Authorization` header.
    ///
    /// A token that cannot travel in a header is rejected as `Unauthorized`
    /// rather than sent without credentials.
    pub fn authorization(self, token: &str, bearer: bool) -> Result<Self> {
        let raw = if bearer {
            format!("Bearer {}", token)
        } else {
            token.to_string()
        };
        let mut value = HeaderValue::from_str(&raw).map_err(|_| {
            log::warn!("Session token is not a valid header value");
            ApiError::Unauthorized
        })?;
        value.set_sensitive(true);
        Ok(self.header(AUTHORIZATION, value))
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body)
            .map_err(|e| ApiError::network(format!("failed to encode request: {}", e)))?;
        self.body = Some(Body::Json(json));
        Ok(self.header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = Some(Body::Multipart(form));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build(self) -> Result<(reqwest::RequestBuilder, Duration)> {
        let mut url = Url::parse(&self.url)?;

        if !self.query_params.is_empty() {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                query_pairs.append_pair(key, value);
            }
        }

        let mut req = self.client.request(self.method, url).headers(self.headers);

        match self.body {
            Some(Body::Json(bytes)) => req = req.body(bytes),
            Some(Body::Multipart(form)) => req = req.multipart(form),
            None => {}
        }

        Ok((req, self.timeout))
    }

    /// Execute the request and collect the status and body.
    ///
    /// Transport failures and timeouts surface as `ApiError::Network`.
    pub async fn send(self) -> Result<RawResponse> {
        let method = self.method.clone();
        let url = self.url.clone();
        let (req, timeout) = self.build()?;

        let round_trip = async {
            let response = req.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, ApiError>(RawResponse { status, body })
        };

        let result = tokio::time::timeout(timeout, round_trip)
            .await
            .unwrap_or_else(|_| {
                Err(ApiError::network(format!(
                    "request timed out after {:?}",
                    timeout
                )))
            });

        match &result {
            Ok(raw) => log::debug!("{} {} -> {}", method, url, raw.status),
            Err(e) => log::debug!("{} {} failed: {}", method, url, e),
        }
        result
    }
}

/// Helper for creating HTTP requests
pub(crate) struct Fetch;

impl Fetch {
    pub fn get(client: &Client, url: String) -> FetchBuilder<'_> {
        FetchBuilder::new(client, url, Method::GET)
    }

    pub fn post(client: &Client, url: String) -> FetchBuilder<'_> {
        FetchBuilder::new(client, url, Method::POST)
    }

    pub fn put(client: &Client, url: String) -> FetchBuilder<'_> {
        FetchBuilder::new(client, url, Method::PUT)
    }

    pub fn delete(client: &Client, url: String) -> FetchBuilder<'_> {
        FetchBuilder::new(client, url, Method::DELETE)
    }
}
