pub mod middleware;

use serde::Deserialize;

/// Error envelope returned by Google Cloud APIs: `{"error": {...}}`.
#[derive(Debug, Deserialize)]
pub struct GoogleErrorResponse {
    pub error: GoogleErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct GoogleErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

/// Drains a failed response and extracts its error message, falling back to
/// `default_msg` plus the HTTP status when the body is not the standard
/// envelope. The HTTP status code is returned alongside so callers can
/// classify the failure.
pub async fn read_error_response(response: reqwest::Response, default_msg: &str) -> (u16, String) {
    let status = response.status();
    let message = match response.json::<GoogleErrorResponse>().await {
        Ok(envelope) => envelope.error.message,
        Err(_) => format!("{}: {}", default_msg, status),
    };
    (status.as_u16(), message)
}
