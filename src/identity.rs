//! Client identity rotation.
//!
//! Every task gets a freshly drawn [`ClientIdentity`] and its own
//! [`Session`], so no two tasks share cookies, connection pools, or a
//! request signature.

use crate::error::TaskError;
use rand::rng;
use rand::seq::IndexedRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    // Chrome - Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Firefox - Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    // Chrome - macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_3_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    // Safari - macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    // Firefox - macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 11.7; rv:120.0) Gecko/20100101 Firefox/120.0",
    // Safari - iPhone
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    // Chrome - Android
    "Mozilla/5.0 (Linux; Android 13; SM-S908B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
    // Edge - Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-US,en;q=0.8",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-US,en;q=0.9,es;q=0.7",
];

/// Simulated browser fingerprint sent with every request of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

impl ClientIdentity {
    /// Draw each attribute independently at random.
    pub fn random() -> Self {
        let mut r = rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut r).copied().unwrap_or(USER_AGENTS[0]),
            accept_language: ACCEPT_LANGUAGES
                .choose(&mut r)
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0]),
        }
    }
}

/// An extraction session owned by exactly one task.
#[derive(Debug)]
pub struct Session {
    pub identity: ClientIdentity,
    pub client: Client,
    request_timeout: Duration,
}

impl Session {
    /// Build a fresh HTTP client carrying `identity`.
    pub fn open(identity: ClientIdentity, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(identity.accept_language));

        let client = Client::builder()
            .user_agent(identity.user_agent)
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            identity,
            client,
            request_timeout,
        })
    }

    /// Classify a request error from this session's client.
    pub fn request_error(&self, e: reqwest::Error) -> TaskError {
        if e.is_timeout() {
            TaskError::Timeout(self.request_timeout)
        } else {
            TaskError::from(e)
        }
    }
}
