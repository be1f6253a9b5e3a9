// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! HTTP implementation of the daemon client.

use std::time::Duration;

use async_trait::async_trait;
use pinner_core::Skylink;
use reqwest::{Response, StatusCode, Url};

use crate::{
    api::{DirectoryListing, FileHealth, FileMetadata, ResolveResponse},
    error::ClientBuildError,
    DaemonClient, DaemonError,
};

/// A builder that can be used to construct a [`HttpDaemonClient`].
///
/// Can be created with [`HttpDaemonClient::builder()`].
#[derive(Debug)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    api_password: String,
    timeout: Duration,
    user_agent: String,
}

impl ClientBuilder {
    /// Default timeout for daemon calls. Directory listings on a full
    /// daemon are the slowest call this client makes.
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new builder for a daemon at the given authority.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            api_password: String::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: "pinner".to_owned(),
        }
    }

    /// Sets the API password sent with every request.
    pub fn api_password(mut self, password: impl Into<String>) -> Self {
        self.api_password = password.into();
        self
    }

    /// Sets the request timeout. The default is 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consumes the builder and returns the client.
    pub fn build(self) -> Result<HttpDaemonClient, ClientBuildError> {
        let base_url = Url::parse(&format!("http://{}:{}", self.host, self.port))
            .map_err(|_| ClientBuildError::InvalidHostOrPort)?;
        let inner = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .timeout(self.timeout)
            .build()?;
        Ok(HttpDaemonClient {
            inner,
            base_url,
            api_password: self.api_password,
        })
    }
}

/// [`DaemonClient`] implementation speaking the daemon's HTTP API.
///
/// The daemon listens on loopback and authenticates callers with an API
/// password sent as HTTP basic auth.
#[derive(Debug, Clone)]
pub struct HttpDaemonClient {
    inner: reqwest::Client,
    base_url: Url,
    api_password: String,
}

impl HttpDaemonClient {
    /// Creates a new [`ClientBuilder`] for constructing a client.
    pub fn builder(host: impl Into<String>, port: u16) -> ClientBuilder {
        ClientBuilder::new(host, port)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("an http base url always has a path")
            .extend(segments);
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.inner
            .request(method, url)
            .basic_auth("", Some(&self.api_password))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, DaemonError> {
        let response = request.send().await.map_err(DaemonError::from_reqwest)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(DaemonError::status(status, message))
    }
}

#[async_trait]
impl DaemonClient for HttpDaemonClient {
    async fn pin(&self, skylink: &Skylink) -> Result<(), DaemonError> {
        tracing::debug!(%skylink, "instructing the daemon to pin");
        let url = self.url(&["pins", &skylink.to_string()]);
        let response = self.request(reqwest::Method::POST, url).send().await;
        let response = response.map_err(DaemonError::from_reqwest)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            return Err(DaemonError::already_pinned());
        }
        let message = response.text().await.unwrap_or_default();
        Err(DaemonError::status(status, message))
    }

    async fn unpin(&self, skylink: &Skylink) -> Result<(), DaemonError> {
        tracing::debug!(%skylink, "instructing the daemon to unpin");
        let url = self.url(&["pins", &skylink.to_string()]);
        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }

    async fn metadata(&self, skylink: &Skylink) -> Result<FileMetadata, DaemonError> {
        let url = self.url(&["objects", &skylink.to_string(), "metadata"]);
        self.send(self.request(reqwest::Method::GET, url))
            .await?
            .json()
            .await
            .map_err(DaemonError::from_reqwest)
    }

    async fn file_health(&self, skylink: &Skylink) -> Result<FileHealth, DaemonError> {
        let url = self.url(&["objects", &skylink.to_string(), "health"]);
        self.send(self.request(reqwest::Method::GET, url))
            .await?
            .json()
            .await
            .map_err(DaemonError::from_reqwest)
    }

    async fn resolve(&self, skylink: &Skylink) -> Result<Skylink, DaemonError> {
        let url = self.url(&["resolve", &skylink.to_string()]);
        let response: ResolveResponse = self
            .send(self.request(reqwest::Method::GET, url))
            .await?
            .json()
            .await
            .map_err(DaemonError::from_reqwest)?;
        Ok(response.skylink)
    }

    async fn list_dir(&self, path: &str) -> Result<DirectoryListing, DaemonError> {
        let mut url = self.url(&["dirs"]);
        url.path_segments_mut()
            .expect("an http base url always has a path")
            .extend(path.split('/'));
        self.send(self.request(reqwest::Method::GET, url))
            .await?
            .json()
            .await
            .map_err(DaemonError::from_reqwest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpDaemonClient {
        HttpDaemonClient::builder("10.10.10.10", 9980)
            .api_password("secret")
            .build()
            .unwrap()
    }

    #[test]
    fn urls_are_rooted_at_the_daemon_authority() {
        let client = client();
        assert_eq!(
            client.url(&["pins", "abc"]).as_str(),
            "http://10.10.10.10:9980/pins/abc"
        );
    }

    #[test]
    fn nested_dir_paths_become_separate_segments() {
        let client = client();
        let mut url = client.url(&["dirs"]);
        url.path_segments_mut().unwrap().extend("pins/var/sub".split('/'));
        assert_eq!(url.as_str(), "http://10.10.10.10:9980/dirs/pins/var/sub");
    }

    #[test]
    fn invalid_authorities_are_rejected() {
        assert!(matches!(
            HttpDaemonClient::builder("not a host", 1).build(),
            Err(ClientBuildError::InvalidHostOrPort)
        ));
    }
}
