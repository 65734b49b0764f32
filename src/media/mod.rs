pub mod cloudinary;
pub mod fetch;

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image host rejected upload: {0}")]
    Rejected(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Where an image to be hosted comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Bytes received from the client.
    Bytes { file_name: String, data: Bytes },
    /// A remote URL the image host fetches on its own.
    Remote(String),
}

impl ImageSource {
    pub fn describe(&self) -> &str {
        match self {
            Self::Bytes { file_name, .. } => file_name,
            Self::Remote(url) => url,
        }
    }
}

/// Remote image CDN: stores an image and hands back its public URL.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, source: ImageSource) -> Result<String, MediaError>;
}
