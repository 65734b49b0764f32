use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::{Attempt, Policy};

use super::MediaError;
use crate::validation;

const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 5;

/// Downloads images from remote URLs with a size cap.
///
/// Unless private targets are allowed, host names must resolve to public
/// addresses only and every redirect hop is validated like a client URL.
#[derive(Clone)]
pub struct ImageFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(max_bytes: usize, allow_private: bool) -> Result<Self, MediaError> {
        let mut builder = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent("carupload/0.1");
        builder = if allow_private {
            builder.redirect(Policy::limited(MAX_REDIRECTS))
        } else {
            builder
                .redirect(Policy::custom(public_redirect))
                .dns_resolver(Arc::new(PublicResolver))
        };
        Ok(Self {
            http: builder.build()?,
            max_bytes,
        })
    }

    /// True only when a `HEAD` request answers 200 within five seconds.
    #[tracing::instrument(skip(self))]
    pub async fn is_accessible(&self, url: &str) -> bool {
        match self.http.head(url).timeout(HEAD_TIMEOUT).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::error!(error = %e, "url access error");
                false
            }
        }
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn fetch(&self, url: &str) -> Result<Bytes, MediaError> {
        let mut resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(MediaError::Status(resp.status().as_u16()));
        }
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(MediaError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = resp.chunk().await? {
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

fn public_redirect(attempt: Attempt) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }
    match validation::check_image_url(attempt.url().as_str(), false) {
        Ok(()) => attempt.follow(),
        Err(e) => {
            tracing::warn!(url = %attempt.url(), error = %e, "refusing redirect");
            attempt.error(format!("redirect refused: {e}"))
        }
    }
}

/// Resolver that refuses names pointing at private or reserved addresses.
struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_owned();
        Box::pin(async move {
            let addrs = resolve_public(&host).await?;
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Resolve `host`, failing if any answer is a private address.
async fn resolve_public(host: &str) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    if let Some(addr) = addrs.iter().find(|a| validation::is_private_ip(a.ip())) {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{host} resolves to private address {}", addr.ip()),
        ));
    }
    Ok(addrs)
}
