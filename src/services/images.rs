use reqwest::Client;
use std::future::Future;
use std::time::Duration;

/// Source of listing images for the annotation pipeline.
pub trait ImageFetcher: Send + Sync {
    /// Up to `limit` successfully downloaded images, in URL order.
    /// Individual failures are skipped, never raised.
    fn fetch(&self, urls: &[String], limit: usize) -> impl Future<Output = Vec<Vec<u8>>> + Send;
}

/// Downloads images over HTTP with a short per-image timeout.
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, urls: &[String], limit: usize) -> Vec<Vec<u8>> {
        let mut images = Vec::new();
        for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            if images.len() >= limit {
                break;
            }
            match self.download(url).await {
                Ok(bytes) if !bytes.is_empty() => images.push(bytes),
                Ok(_) => tracing::debug!(%url, "Empty image body"),
                Err(e) => tracing::debug!(%url, error = %e, "Image download failed"),
            }
        }
        images
    }
}
