// SPDX-License-Identifier: MIT OR Apache-2.0
//! The synthetic response surface.

use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Body chunk size used during playback.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// The response object handed to the host's `response` listener.
///
/// Headers are normalized lower-case; `raw_headers` preserves the
/// name/value alternation libraries expect. The body streams in chunks via
/// [`MockResponse::chunk`] and terminates with `None` (the end-of-stream
/// push).
#[derive(Debug)]
pub struct MockResponse {
    /// HTTP status code (defaults to 200 when the recording omits one).
    pub status_code: u16,
    /// HTTP status message (defaults to `"OK"`).
    pub status_message: String,
    /// Lower-cased header map.
    pub headers: BTreeMap<String, String>,
    /// Alternating name/value list, original casing lost by design.
    pub raw_headers: Vec<String>,
    /// `"1.1"`.
    pub http_version: String,
    /// Major version component.
    pub http_version_major: u8,
    /// Minor version component.
    pub http_version_minor: u8,
    body: mpsc::UnboundedReceiver<Bytes>,
}

impl MockResponse {
    pub(crate) fn new(
        status_code: u16,
        status_message: String,
        headers: BTreeMap<String, String>,
        body: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        let raw_headers = headers
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .collect();
        Self {
            status_code,
            status_message,
            headers,
            raw_headers,
            http_version: "1.1".into(),
            http_version_major: 1,
            http_version_minor: 1,
            body,
        }
    }

    /// Next body chunk; `None` is the end-of-stream push.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.body.recv().await
    }

    /// Drain the whole body into one buffer.
    pub async fn aggregate(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Case-insensitive single-header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_chunks_end_with_none() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut response = MockResponse::new(200, "OK".into(), BTreeMap::new(), rx);
        tx.send(Bytes::from_static(b"hello ")).unwrap();
        tx.send(Bytes::from_static(b"world")).unwrap();
        drop(tx);

        assert_eq!(response.chunk().await.unwrap(), Bytes::from_static(b"hello "));
        assert_eq!(response.chunk().await.unwrap(), Bytes::from_static(b"world"));
        assert!(response.chunk().await.is_none());
    }

    #[tokio::test]
    async fn raw_headers_alternate_name_value() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let headers = BTreeMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("x-custom".to_string(), "1".to_string()),
        ]);
        let response = MockResponse::new(200, "OK".into(), headers, rx);
        assert_eq!(
            response.raw_headers,
            vec!["content-type", "application/json", "x-custom", "1"]
        );
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }
}
