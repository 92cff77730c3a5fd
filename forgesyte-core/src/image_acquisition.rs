//! Resilient fetch of a remote artifact into bytes, with bounded retry.

use std::time::Duration;

use base64::Engine;
use tracing::warn;

use crate::error::CoreError;
use crate::plugin::JsonMap;

const DEFAULT_MAX_RETRIES: u32 = 3;
const BACKOFF_FLOOR: Duration = Duration::from_secs(2);
const BACKOFF_CEILING: Duration = Duration::from_secs(10);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Field names consulted, in order, by [`locate_bytes`]'s in-arguments step.
const EMBEDDED_BASE64_FIELD: &str = "image_base64";

pub struct ImageAcquisition {
    client: reqwest::Client,
    max_retries: u32,
    fetch_timeout: Duration,
}

impl ImageAcquisition {
    pub fn new(max_retries: u32, fetch_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_retries,
            fetch_timeout,
        }
    }

    /// Source precedence: (a) uploaded file bytes, (b) URL, (c) base64 in a
    /// designated arguments field, (d) base64 in the raw request body.
    /// First non-empty source wins.
    pub async fn locate_bytes(
        &self,
        uploaded: Option<&[u8]>,
        url: Option<&str>,
        arguments: &JsonMap,
        raw_body_base64: Option<&str>,
    ) -> Result<Vec<u8>, CoreError> {
        if let Some(bytes) = uploaded {
            if !bytes.is_empty() {
                return Ok(bytes.to_vec());
            }
        }
        if let Some(url) = url {
            if !url.is_empty() {
                return self.fetch_url(url).await;
            }
        }
        if let Some(encoded) = arguments.get(EMBEDDED_BASE64_FIELD).and_then(|v| v.as_str()) {
            if !encoded.is_empty() {
                return decode_base64(encoded);
            }
        }
        if let Some(encoded) = raw_body_base64 {
            if !encoded.is_empty() {
                return decode_base64(encoded);
            }
        }
        Err(CoreError::validation(
            "artifact",
            "no image source supplied (uploaded file, URL, or base64)",
        ))
    }

    /// Fetches `url` with bounded retry: exponential backoff between
    /// `BACKOFF_FLOOR` and `BACKOFF_CEILING`, retrying only on transient
    /// transport failures. A definite HTTP status error is surfaced
    /// immediately without retry.
    pub async fn fetch_url(&self, url: &str) -> Result<Vec<u8>, CoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(url)
                .timeout(self.fetch_timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    return response
                        .error_for_status()
                        .map_err(|e| CoreError::ExternalService {
                            service: "image_fetch".to_string(),
                            source: e.into(),
                        })?
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| CoreError::ExternalService {
                            service: "image_fetch".to_string(),
                            source: e.into(),
                        });
                }
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    let backoff = backoff_for_attempt(attempt);
                    warn!(url, attempt, backoff_ms = backoff.as_millis() as u64, "transient fetch failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(CoreError::ExternalService {
                        service: "image_fetch".to_string(),
                        source: e.into(),
                    });
                }
            }
        }
    }
}

impl Default for ImageAcquisition {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_FETCH_TIMEOUT)
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let scaled = BACKOFF_FLOOR.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    scaled.min(BACKOFF_CEILING)
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, CoreError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::validation("artifact", format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_grows_and_clamps() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff_for_attempt(4), BACKOFF_CEILING);
        assert_eq!(backoff_for_attempt(10), BACKOFF_CEILING);
    }

    #[tokio::test]
    async fn uploaded_bytes_take_precedence() {
        let acquisition = ImageAcquisition::default();
        let bytes = acquisition
            .locate_bytes(Some(b"uploaded"), Some("http://example.invalid/x.jpg"), &Default::default(), None)
            .await
            .unwrap();
        assert_eq!(bytes, b"uploaded");
    }

    #[tokio::test]
    async fn embedded_base64_used_when_no_file_or_url() {
        let acquisition = ImageAcquisition::default();
        let args = json!({"image_base64": base64::engine::general_purpose::STANDARD.encode(b"hello")})
            .as_object()
            .unwrap()
            .clone();
        let bytes = acquisition.locate_bytes(None, None, &args, None).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn no_source_is_an_error() {
        let acquisition = ImageAcquisition::default();
        let result = acquisition.locate_bytes(None, None, &Default::default(), None).await;
        assert!(result.is_err());
    }
}
