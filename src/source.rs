use async_trait::async_trait;
use std::time::Duration;

use crate::error::SourceError;

/// Something tile bytes can be downloaded from.
///
/// The fetch pipeline only ever talks to upstream through this trait, which
/// lets tests substitute a canned source.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// GETs `url` and returns the full response body.
    async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

/// Fetches tiles over HTTP(S) with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Builds a client with the given per-request timeout.
    ///
    /// Pass the zero duration to disable the timeout.
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if timeout > Duration::ZERO {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl TileSource for HttpSource {
    async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
