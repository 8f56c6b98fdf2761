use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures_core::{ready, Stream};
use hyper::client::HttpConnector;
use hyper::header::USER_AGENT;
use hyper::{Body, Client, Request, Uri};
use hyper_tls::HttpsConnector;
use pin_project_lite::pin_project;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::{trace, warn};

use crate::checksum::Digests;

/// A fully materialized download, with all digests computed while the body
/// was streaming in.
pub struct DownloadedFile {
    pub data: Bytes,
    pub digests: Digests,
}

/// Fetches a document by URL. All failures (transport errors, missing
/// documents, truncated bodies) collapse to `None`; a repository that cannot
/// produce a document is handled the same way regardless of the reason, and
/// the reason is logged here.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<DownloadedFile>;
}

/// Downloader backed by a shared hyper client.
///
/// Instances do HTTP connection caching internally, so keeping them alive has
/// performance benefits.
pub struct HttpDownloader {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HttpDownloader {
    pub fn new() -> HttpDownloader {
        HttpDownloader {
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
        }
    }

    async fn get(&self, url: &str) -> anyhow::Result<Option<DownloadedFile>> {
        let request = Request::builder()
            .method("GET")
            .uri(Uri::try_from(url)?)
            .header(USER_AGENT, "curl/7.68.0") //TODO Maven Central returns a 403 without a user agent - which one to use?
            .body(Body::empty())?;

        trace!("getting {}", url);
        let response = self.client.request(request).await?;
        if !response.status().is_success() {
            trace!("{} returned {}", url, response.status());
            return Ok(None);
        }

        let mut body = DigestingBody::new(response.into_body());
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }

        Ok(Some(DownloadedFile {
            data: data.freeze(),
            digests: body.digests(),
        }))
    }
}

impl Default for HttpDownloader {
    fn default() -> HttpDownloader {
        HttpDownloader::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Option<DownloadedFile> {
        match self.get(url).await {
            Ok(result) => result,
            Err(e) => {
                warn!("failed to fetch {}: {}", url, e);
                None
            }
        }
    }
}

pin_project! {
    /// Wraps an HTTP body, computing all supported digests of the data as it
    /// streams through without materializing it first. [DigestingBody::digests]
    /// is only meaningful once the stream is fully drained.
    pub struct DigestingBody {
        #[pin]
        http_body: Body,
        sha1: Sha1,
        sha256: Sha256,
        md5: md5::Context,
    }
}

impl DigestingBody {
    pub fn new(http_body: Body) -> DigestingBody {
        DigestingBody {
            http_body,
            sha1: Default::default(),
            sha256: Default::default(),
            md5: md5::Context::new(),
        }
    }

    pub fn digests(&self) -> Digests {
        Digests {
            sha1: self.sha1.clone().finalize().into(),
            sha256: self.sha256.clone().finalize().into(),
            md5: self.md5.clone().compute().0,
        }
    }
}

impl Stream for DigestingBody {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.http_body.poll_next(cx)) {
            Some(Ok(data)) => {
                this.sha1.update(&data);
                this.sha256.update(&data);
                this.md5.consume(&data);
                Poll::Ready(Some(Ok(data)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.http_body.size_hint()
    }
}

/// In-memory downloader for tests. Documents are published under their full
/// URL; everything else is absent. Fetches are counted per URL so tests can
/// verify how often a document was actually requested.
pub struct TransientDownloader {
    documents: Mutex<HashMap<String, Bytes>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
}

impl TransientDownloader {
    pub fn new() -> TransientDownloader {
        TransientDownloader {
            documents: Mutex::new(HashMap::new()),
            fetch_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.documents.lock().unwrap().insert(url.into(), data.into());
    }

    pub fn remove(&self, url: &str) {
        self.documents.lock().unwrap().remove(url);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetch_counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Default for TransientDownloader {
    fn default() -> TransientDownloader {
        TransientDownloader::new()
    }
}

#[async_trait]
impl Downloader for TransientDownloader {
    async fn fetch(&self, url: &str) -> Option<DownloadedFile> {
        *self.fetch_counts.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let data = self.documents.lock().unwrap().get(url).cloned()?;
        Some(DownloadedFile {
            digests: Digests::of(&data),
            data,
        })
    }
}
