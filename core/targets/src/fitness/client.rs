//! HTTP client for the wger weight entry endpoint.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client, Response};
use std::time::Duration;
use tracing::debug;
use url::Url;

use scalesync_common::{Error, Result, Secret};

use super::api::{WeightEntryApi, WeightEntryForm, WeightEntryPage, DATE_FORMAT};

/// Public wger instance.
pub const DEFAULT_BASE_URL: &str = "https://wger.de/api/v2/";

const USER_AGENT: &str = concat!("scalesync/", env!("CARGO_PKG_VERSION"));

/// wger REST client authenticated with an API token.
pub struct WgerClient {
    http: Client,
    entries: Url,
    token: Secret,
}

impl WgerClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    /// - `Config` if the base URL is malformed
    /// - `Network` if the HTTP client cannot be built
    pub fn new(base_url: &str, token: Secret, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let entries = base
            .join("weightentry/")
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", base_url, e)))?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, entries, token })
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token.expose())
    }

    fn entry_url(&self, id: u64) -> Result<Url> {
        self.entries
            .join(&format!("{}/", id))
            .map_err(|e| Error::InvalidInput(format!("Invalid weight entry id {}: {}", id, e)))
    }

    /// Turn a non-success response into `Error::Api`.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl WeightEntryApi for WgerClient {
    async fn list(&self, date: Option<NaiveDate>) -> Result<WeightEntryPage> {
        let mut request = self
            .http
            .get(self.entries.clone())
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::ACCEPT, "application/json");
        if let Some(date) = date {
            request = request.query(&[("date", date.format(DATE_FORMAT).to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to list weight entries: {}", e)))?;

        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse weight entries: {}", e)))
    }

    async fn create(&self, form: &WeightEntryForm) -> Result<()> {
        debug!("POST weightentry date={} weight={}", form.date_field(), form.weight_field());
        let response = self
            .http
            .post(self.entries.clone())
            .header(header::AUTHORIZATION, self.auth_header())
            .form(&form.fields())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to create weight entry: {}", e)))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn patch(&self, id: u64, form: &WeightEntryForm) -> Result<()> {
        debug!("PATCH weightentry/{} weight={}", id, form.weight_field());
        let response = self
            .http
            .patch(self.entry_url(id)?)
            .header(header::AUTHORIZATION, self.auth_header())
            .form(&form.fields())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to update weight entry: {}", e)))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        debug!("DELETE weightentry/{}", id);
        let response = self
            .http
            .delete(self.entry_url(id)?)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete weight entry: {}", e)))?;

        Self::check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> WgerClient {
        WgerClient::new(base, Secret::new("abc123"), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_entry_urls() {
        let client = client("https://wger.de/api/v2/");
        assert_eq!(client.entries.as_str(), "https://wger.de/api/v2/weightentry/");
        assert_eq!(
            client.entry_url(42).unwrap().as_str(),
            "https://wger.de/api/v2/weightentry/42/"
        );
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let client = client("http://localhost:8000/api/v2");
        assert_eq!(client.entries.as_str(), "http://localhost:8000/api/v2/weightentry/");
    }

    #[test]
    fn test_token_header() {
        assert_eq!(client(DEFAULT_BASE_URL).auth_header(), "Token abc123");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = WgerClient::new("not a url", Secret::new("x"), Duration::from_secs(5));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
