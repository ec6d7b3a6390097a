//! Client for the HTTP API of a remote conplicity instance.

use std::collections::HashMap;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ConplicityError, Result};
use crate::volume::Volume;

/// Value of the `type` field in a healthy ping response.
const PONG: &str = "pong";

#[derive(Clone, Debug)]
pub struct InventoryClient {
    client: reqwest::Client,
    remote_address: String,
}

impl InventoryClient {
    /// Builds a client sending `Authorization: Bearer <psk>` on every request.
    pub fn new(remote_address: impl Into<String>, psk: impl AsRef<str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", psk.as_ref()))
            .map_err(|e| ConplicityError::Config(format!("invalid preshared key: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConplicityError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            remote_address: remote_address.into().trim_end_matches('/').to_string(),
        })
    }

    /// Builds a client and checks that the remote instance answers.
    pub async fn connect(remote_address: impl Into<String>, psk: impl AsRef<str>) -> Result<Self> {
        let client = Self::new(remote_address, psk)?;
        client.ping().await?;
        Ok(client)
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub async fn ping(&self) -> Result<()> {
        let (url, body) = self.fetch(Method::GET, "/ping").await?;
        let response: HashMap<String, serde_json::Value> = decode(&url, &body)?;
        match response.get("type").and_then(|value| value.as_str()) {
            Some(PONG) => Ok(()),
            _ => Err(ConplicityError::UnexpectedPing { body }),
        }
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.request(Method::GET, "/volumes").await
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, endpoint: &str) -> Result<T> {
        let (url, body) = self.fetch(method, endpoint).await?;
        decode(&url, &body)
    }

    /// Sends the request and returns the full body of a 200 response.
    async fn fetch(&self, method: Method, endpoint: &str) -> Result<(String, String)> {
        let url = format!("{}{}", self.remote_address, endpoint);
        debug!(method = %method, url = %url, "Sending request to remote instance");

        let transport = |source: reqwest::Error| ConplicityError::Transport {
            url: url.clone(),
            source,
        };
        let res = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        let body = res.text().await.map_err(transport)?;

        if status != StatusCode::OK {
            return Err(ConplicityError::UnexpectedStatus {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok((url, body))
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| ConplicityError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
        body: body.to_string(),
    })
}
