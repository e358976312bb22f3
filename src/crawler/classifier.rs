//! Block and failure classification
//!
//! Turns a raw fetch outcome into one `FailureKind`. The orchestrator decides
//! what to do with each kind; nothing here retries or sleeps.

use crate::crawler::fetcher::{FetchResponse, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload fragments that indicate an anti-automation challenge
pub const DEFAULT_CHALLENGE_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "unusual traffic",
    "i'm not a robot",
    "are you a robot",
    "access denied",
    "cf-chl",
    "px-captcha",
];

/// Outcome category of a fetch or extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Ok,
    RateLimited,
    BotChallenge,
    NetworkError,
    /// Structurally valid response without any extractable record
    ParseEmpty,
    /// Malformed or incomplete record
    ValidationError,
    UnknownError,
}

impl FailureKind {
    /// Returns true for outcomes that count against the block rate
    pub fn is_block(&self) -> bool {
        matches!(self, Self::RateLimited | Self::BotChallenge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::RateLimited => "rate-limited",
            Self::BotChallenge => "bot-challenge",
            Self::NetworkError => "network-error",
            Self::ParseEmpty => "parse-empty",
            Self::ValidationError => "validation-error",
            Self::UnknownError => "unknown-error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies fetch outcomes for one site
#[derive(Debug, Clone)]
pub struct Classifier {
    markers: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Classifier {
    /// Creates a classifier using the default markers plus site-specific ones
    pub fn new(extra_markers: &[String]) -> Self {
        let markers = DEFAULT_CHALLENGE_MARKERS
            .iter()
            .map(|m| m.to_string())
            .chain(extra_markers.iter().map(|m| m.to_lowercase()))
            .collect();
        Self { markers }
    }

    /// Classifies a fetch outcome
    ///
    /// # Rules
    ///
    /// | Outcome | Kind |
    /// |---------|------|
    /// | Transport failure | NetworkError |
    /// | HTTP 429, or 503 with `Retry-After` | RateLimited |
    /// | HTTP 403, or a challenge marker in a 2xx body | BotChallenge |
    /// | Other 5xx | NetworkError |
    /// | Other non-2xx | UnknownError |
    /// | 2xx with an empty body | ParseEmpty |
    /// | Any other 2xx | Ok |
    pub fn classify(&self, outcome: &Result<FetchResponse, TransportError>) -> FailureKind {
        let response = match outcome {
            Ok(response) => response,
            Err(TransportError::RenderingUnavailable) => return FailureKind::UnknownError,
            Err(_) => return FailureKind::NetworkError,
        };

        match response.status {
            429 => FailureKind::RateLimited,
            503 if response.retry_after.is_some() => FailureKind::RateLimited,
            403 => FailureKind::BotChallenge,
            500..=599 => FailureKind::NetworkError,
            200..=299 => {
                if response.body.trim().is_empty() {
                    FailureKind::ParseEmpty
                } else if self.has_challenge_marker(&response.body) {
                    FailureKind::BotChallenge
                } else {
                    FailureKind::Ok
                }
            }
            _ => FailureKind::UnknownError,
        }
    }

    /// Classifies the result of running extraction over a valid payload
    pub fn classify_extraction(record_count: usize) -> FailureKind {
        if record_count == 0 {
            FailureKind::ParseEmpty
        } else {
            FailureKind::Ok
        }
    }

    /// Returns true if the body contains any challenge marker
    pub fn has_challenge_marker(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.markers.iter().any(|m| lowered.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(status: u16, body: &str) -> Result<FetchResponse, TransportError> {
        Ok(FetchResponse::with_status(status, "https://shop.test/", body))
    }

    #[test]
    fn test_transport_failures_are_network_errors() {
        let classifier = Classifier::default();
        let timeout = Err(TransportError::Timeout("https://shop.test/".to_string()));
        assert_eq!(classifier.classify(&timeout), FailureKind::NetworkError);

        let reset = Err(TransportError::Connect {
            url: "https://shop.test/".to_string(),
            message: "connection reset".to_string(),
        });
        assert_eq!(classifier.classify(&reset), FailureKind::NetworkError);
    }

    #[test]
    fn test_status_codes() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&response(429, "")), FailureKind::RateLimited);
        assert_eq!(classifier.classify(&response(403, "")), FailureKind::BotChallenge);
        assert_eq!(classifier.classify(&response(502, "")), FailureKind::NetworkError);
        assert_eq!(classifier.classify(&response(503, "")), FailureKind::NetworkError);
        assert_eq!(classifier.classify(&response(404, "gone")), FailureKind::UnknownError);
        assert_eq!(classifier.classify(&response(200, "{}")), FailureKind::Ok);
    }

    #[test]
    fn test_503_with_retry_after_is_rate_limited() {
        let classifier = Classifier::default();
        let mut resp = FetchResponse::with_status(503, "https://shop.test/", "");
        resp.retry_after = Some(Duration::from_secs(30));
        assert_eq!(classifier.classify(&Ok(resp)), FailureKind::RateLimited);
    }

    #[test]
    fn test_challenge_markers_in_body() {
        let classifier = Classifier::default();
        let page = "<html><body>We detected Unusual Traffic from your network</body></html>";
        assert_eq!(classifier.classify(&response(200, page)), FailureKind::BotChallenge);

        let iframe = r#"<iframe src="https://www.google.com/recaptcha/api2/anchor"></iframe>"#;
        assert_eq!(classifier.classify(&response(200, iframe)), FailureKind::BotChallenge);
    }

    #[test]
    fn test_site_specific_markers() {
        let classifier = Classifier::new(&["Please Verify You Are Human".to_string()]);
        let page = "<p>please verify you are human</p>";
        assert_eq!(classifier.classify(&response(200, page)), FailureKind::BotChallenge);
        assert!(!Classifier::default().has_challenge_marker(page));
    }

    #[test]
    fn test_empty_body_is_parse_empty() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&response(200, "  \n")), FailureKind::ParseEmpty);
        assert_eq!(Classifier::classify_extraction(0), FailureKind::ParseEmpty);
        assert_eq!(Classifier::classify_extraction(3), FailureKind::Ok);
    }

    #[test]
    fn test_block_kinds() {
        assert!(FailureKind::RateLimited.is_block());
        assert!(FailureKind::BotChallenge.is_block());
        assert!(!FailureKind::NetworkError.is_block());
        assert!(!FailureKind::ParseEmpty.is_block());
    }

    #[test]
    fn test_kebab_case_names() {
        let kind: FailureKind = serde_json::from_str("\"network-error\"").unwrap();
        assert_eq!(kind, FailureKind::NetworkError);
        assert_eq!(FailureKind::BotChallenge.to_string(), "bot-challenge");
    }
}
