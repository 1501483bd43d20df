//! Image inlining: remote image reference → self-contained `data:` URL.
//!
//! Remote images may sit behind authentication the raster capturer knows
//! nothing about. Fetching them once through the authenticated client and
//! embedding the bytes as a data URL makes the isolated copy paintable
//! without any further network access.

use crate::error::ExportError;
use crate::http::HttpFetch;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Prefix identifying an already self-contained source.
pub const DATA_URL_PREFIX: &str = "data:";

/// Resolve `src` into a `data:` URL.
///
/// * empty input → empty output
/// * `data:` input → returned unchanged
/// * anything else → fetched through `http` and base64-encoded
///
/// The MIME type comes from the response's `Content-Type`, falling back to
/// sniffing the bytes.
pub async fn url_to_data_url(http: &dyn HttpFetch, src: &str) -> Result<String, ExportError> {
    if src.is_empty() {
        return Ok(String::new());
    }
    if is_inlined(src) {
        return Ok(src.to_string());
    }

    let fetched = http.fetch_binary(src).await?;
    let mime = fetched
        .content_type
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
        .or_else(|| sniff_mime(&fetched.bytes))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let bytes = fetched.bytes;
    let len = bytes.len();
    // Base64 of a multi-megabyte photo is CPU work; keep it off the async worker.
    let encoded = tokio::task::spawn_blocking(move || STANDARD.encode(&bytes))
        .await
        .map_err(|e| ExportError::ImageEncode {
            url: src.to_string(),
            detail: format!("encode task failed: {e}"),
        })?;

    debug!("Inlined {} ({} bytes, {}) → {} chars", src, len, mime, encoded.len());
    Ok(format!("{DATA_URL_PREFIX}{mime};base64,{encoded}"))
}

/// Whether `src` is already a self-contained data URL.
pub fn is_inlined(src: &str) -> bool {
    src.starts_with(DATA_URL_PREFIX)
}

fn sniff_mime(bytes: &[u8]) -> Option<String> {
    let format = image::guess_format(bytes).ok()?;
    Some(format.to_mime_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHttp;
    use std::sync::atomic::Ordering;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[tokio::test]
    async fn empty_source_stays_empty_without_fetching() {
        let http = FakeHttp::new(None, b"");
        assert_eq!(url_to_data_url(&http, "").await.unwrap(), "");
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn data_urls_are_returned_unchanged() {
        let http = FakeHttp::new(None, b"");
        let src = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(url_to_data_url(&http, src).await.unwrap(), src);
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_source_is_fetched_and_encoded() {
        let http = FakeHttp::new(Some("image/jpeg"), b"hello");
        let out = url_to_data_url(&http, "/users/me/image").await.unwrap();
        assert_eq!(out, "data:image/jpeg;base64,aGVsbG8=");
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);

        // Inlining the result again is a no-op.
        assert_eq!(url_to_data_url(&http, &out).await.unwrap(), out);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mime_is_sniffed_when_header_is_generic() {
        let http = FakeHttp::new(Some("application/octet-stream"), PNG_MAGIC);
        let out = url_to_data_url(&http, "/logo").await.unwrap();
        assert!(out.starts_with("data:image/png;base64,"), "got: {out}");
    }

    #[tokio::test]
    async fn unknown_payload_falls_back_to_octet_stream() {
        let http = FakeHttp::new(None, b"???");
        let out = url_to_data_url(&http, "/blob").await.unwrap();
        assert!(out.starts_with("data:application/octet-stream;base64,"));
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let http = FakeHttp::new(None, b"");
        let err = url_to_data_url(&http, "/missing.png").await.unwrap_err();
        assert!(matches!(err, ExportError::ImageFetch { .. }));
    }
}
