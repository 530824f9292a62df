use super::{CollectionApi, HealthStatus, RemoteError, RemoteResult};
use crate::error::{Result, VaultError};
use crate::model::{Collection, Record};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const SECRET_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`CollectionApi`] over HTTP/JSON.
pub struct HttpCollectionApi {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl HttpCollectionApi {
    /// `timeout` bounds both connecting and the full response.
    pub fn new(base_url: &str, timeout: Duration, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| VaultError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/{}", self.base_url, collection)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.secret {
            Some(secret) => builder.header(SECRET_HEADER, secret),
            None => builder,
        }
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

async fn check_status(resp: Response) -> RemoteResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or(fallback);
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CollectionApi for HttpCollectionApi {
    async fn fetch(&self, collection: Collection) -> RemoteResult<Vec<Record>> {
        let resp = self
            .request(Method::GET, self.collection_url(collection))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.json::<Vec<Record>>().await.map_err(transport)
    }

    async fn replace(&self, collection: Collection, records: &[Record]) -> RemoteResult<()> {
        let resp = self
            .request(Method::POST, self.collection_url(collection))
            .json(records)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Record) -> RemoteResult<()> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let resp = self
            .request(Method::PUT, url)
            .json(patch)
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        check_status(resp).await?;
        Ok(())
    }

    async fn health(&self) -> RemoteResult<HealthStatus> {
        let resp = self
            .request(Method::GET, format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.json::<HealthStatus>().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped() {
        let api =
            HttpCollectionApi::new("http://localhost:3000/", Duration::from_secs(1), None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:3000");
        assert_eq!(
            api.collection_url(Collection::Invoices),
            "http://localhost:3000/api/invoices"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Port 9 (discard) is closed on test machines
        let api =
            HttpCollectionApi::new("http://127.0.0.1:9", Duration::from_millis(500), None).unwrap();
        let err = api.fetch(Collection::Sales).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Transport(_) | RemoteError::Timeout
        ));
    }
}
