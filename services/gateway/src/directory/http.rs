use super::{DirectoryRecord, DirectorySource, FetchError};
use async_trait::async_trait;
use std::time::Duration;

/// Pulls a directory export over HTTP: `GET url` returning a JSON array of
/// [`DirectoryRecord`]s.
#[derive(Debug, Clone)]
pub struct HttpDirectorySource {
    id: String,
    url: String,
    client: reqwest::Client,
}

impl HttpDirectorySource {
    pub fn new(id: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id: id.into(),
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DirectorySource for HttpDirectorySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<DirectoryRecord>, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}
