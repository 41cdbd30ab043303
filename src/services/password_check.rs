//! Breached-password lookup using the k-anonymity range API.
//!
//! Only the first five hex characters of the password's SHA-1 leave the
//! process; the range response is matched against the remaining suffix
//! locally.

use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const PREFIX_LEN: usize = 5;

/// Uppercase hex SHA-1 digest of `password`.
pub fn sha1_hex_upper(password: &str) -> String {
    hex::encode_upper(Sha1::digest(password.as_bytes()))
}

/// Whether a range response body lists `suffix` with a non-zero count.
/// Padding entries carry a count of zero and never match.
pub fn range_contains_suffix(body: &str, suffix: &str) -> bool {
    body.lines().any(|line| {
        let line = line.trim();
        match line.split_once(':') {
            Some((candidate, count)) => {
                candidate.eq_ignore_ascii_case(suffix) && count.trim() != "0"
            }
            None => line.eq_ignore_ascii_case(suffix),
        }
    })
}

pub async fn is_password_leaked(base_url: &str, password: &str) -> AppResult<bool> {
    let hash = sha1_hex_upper(password);
    let (prefix, suffix) = hash.split_at(PREFIX_LEN);

    let client = Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

    let url = format!("{}/range/{}", base_url.trim_end_matches('/'), prefix);
    debug!(prefix, "Querying breached password range");

    let response = client
        .get(&url)
        .header("Add-Padding", "true")
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("Password range request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Upstream(format!(
            "Password range API returned {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to read range response: {}", e)))?;

    Ok(range_contains_suffix(&body, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD_SUFFIX: &str = "1E4C9B93F3F0682250B6CF8331B7EE68FD8";

    #[test]
    fn test_sha1_hex_upper() {
        assert_eq!(
            sha1_hex_upper("password"),
            "5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8"
        );
    }

    #[test]
    fn test_suffix_match_ignores_case_and_crlf() {
        let body = format!(
            "0018A45C4D1DEF81644B54AB7F969B88D65:1\r\n{}:3861493\r\n",
            PASSWORD_SUFFIX.to_lowercase()
        );
        assert!(range_contains_suffix(&body, PASSWORD_SUFFIX));
    }

    #[test]
    fn test_padding_entries_do_not_match() {
        let body = format!("{}:0\n", PASSWORD_SUFFIX);
        assert!(!range_contains_suffix(&body, PASSWORD_SUFFIX));
    }

    #[test]
    fn test_prefix_of_suffix_is_not_a_match() {
        let body = "1E4C9B93F3F0682250B6CF8331B7EE68FD:5\n";
        assert!(!range_contains_suffix(body, PASSWORD_SUFFIX));
    }

    #[tokio::test]
    async fn test_lookup_sends_only_the_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/range/5BAA6")
            .with_status(200)
            .with_body(format!("{}:42\n", PASSWORD_SUFFIX))
            .create_async()
            .await;

        let leaked = is_password_leaked(&server.url(), "password").await.unwrap();

        assert!(leaked);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_lookup_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let result = is_password_leaked(&server.url(), "password").await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }
}
