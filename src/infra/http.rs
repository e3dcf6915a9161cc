// Shared HTTP failure classification for the outbound adapters.

use reqwest::StatusCode;

/// Rate limits, request timeouts and server errors are worth another try.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Connection failures and timeouts are transient.
pub fn is_transient_transport(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
