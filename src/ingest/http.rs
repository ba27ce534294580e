//! HTTP snapshot fetcher.
//!
//! Polls an endpoint that either returns an image directly (`image/*`) or an
//! HTML page referencing one through the first `src="..."` attribute, in
//! which case the referenced image is fetched with a second request.

use anyhow::Result;

use super::source::SnapshotFetcher;
use super::synthetic::{is_stub_url, SyntheticReader};
use crate::frame::Frame;

pub struct HttpSnapshotSource {
    backend: HttpBackend,
}

enum HttpBackend {
    Synthetic(SyntheticReader),
    #[cfg(feature = "ingest-http")]
    Ureq(UreqFetcher),
}

impl HttpSnapshotSource {
    pub fn new(url: &str, timeout: std::time::Duration) -> Result<Self> {
        if is_stub_url(url) {
            return Ok(Self {
                backend: HttpBackend::Synthetic(SyntheticReader::new(url)),
            });
        }
        #[cfg(feature = "ingest-http")]
        {
            Ok(Self {
                backend: HttpBackend::Ureq(UreqFetcher::new(url, timeout)?),
            })
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            let _ = timeout;
            anyhow::bail!("HTTP url '{}' requires the ingest-http feature", url)
        }
    }
}

impl SnapshotFetcher for HttpSnapshotSource {
    fn describe(&self) -> String {
        match &self.backend {
            HttpBackend::Synthetic(reader) => SnapshotFetcher::describe(reader),
            #[cfg(feature = "ingest-http")]
            HttpBackend::Ureq(fetcher) => fetcher.url.to_string(),
        }
    }

    fn fetch(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            HttpBackend::Synthetic(reader) => reader.fetch(),
            #[cfg(feature = "ingest-http")]
            HttpBackend::Ureq(fetcher) => fetcher.fetch(),
        }
    }
}

/// First `src="..."` attribute value in `html`.
pub fn extract_image_src(html: &str) -> Option<&str> {
    const MARKER: &str = "src=\"";
    let start = html.find(MARKER)? + MARKER.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    let src = rest[..end].trim();
    if src.is_empty() {
        None
    } else {
        Some(src)
    }
}

/// Resolve an image reference against the polled URL. Absolute references
/// are used as-is; anything else is appended to the base path.
pub fn resolve_image_url(base: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        src.trim_start_matches('/')
    )
}

#[cfg(feature = "ingest-http")]
struct UreqFetcher {
    url: url::Url,
    agent: ureq::Agent,
}

#[cfg(feature = "ingest-http")]
impl UreqFetcher {
    const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

    fn new(url: &str, timeout: std::time::Duration) -> Result<Self> {
        use anyhow::{anyhow, Context};

        let url = url::Url::parse(url).context("parse http url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported http scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { url, agent })
    }

    fn get_bytes(&self, url: &str) -> Result<(String, Vec<u8>)> {
        use anyhow::Context;
        use std::io::Read;

        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {}", url))?;
        let content_type = response.content_type().to_lowercase();
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(Self::MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)
            .with_context(|| format!("read response body from {}", url))?;
        Ok((content_type, bytes))
    }

    fn fetch(&mut self) -> Result<Option<Frame>> {
        let (content_type, body) = self.get_bytes(self.url.as_str())?;
        if content_type.starts_with("image/") {
            return Ok(decode_image(&body));
        }

        let html = String::from_utf8_lossy(&body);
        let Some(src) = extract_image_src(&html) else {
            log::debug!("HttpSnapshotSource: no image reference in page from {}", self.url);
            return Ok(None);
        };
        let image_url = resolve_image_url(self.url.as_str(), src);
        let (_, bytes) = self.get_bytes(&image_url)?;
        Ok(decode_image(&bytes))
    }
}

/// Undecodable payloads count as "no image"; the endpoint itself answered.
#[cfg(feature = "ingest-http")]
fn decode_image(bytes: &[u8]) -> Option<Frame> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(Frame::new(image.into_rgb8())),
        Err(e) => {
            log::debug!("HttpSnapshotSource: failed to decode image: {}", e);
            None
        }
    }
}
