//! Small shared helpers for the client adapters.

use tokio_tungstenite::tungstenite;

use vb_domain::error::Error;

/// Map a reqwest error onto the error taxonomy.
pub(crate) fn from_reqwest(service: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{service} request timed out"))
    } else {
        Error::upstream(service, e.to_string())
    }
}

/// Map a WebSocket error onto the error taxonomy.
pub(crate) fn from_ws(service: &str, e: tungstenite::Error) -> Error {
    Error::upstream(service, e.to_string())
}

/// Build a WebSocket client request carrying an optional bearer token.
pub(crate) fn ws_request(
    service: &str,
    endpoint: &str,
    api_key: Option<&str>,
) -> Result<tungstenite::handshake::client::Request, Error> {
    use tungstenite::client::IntoClientRequest;

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| from_ws(service, e))?;

    if let Some(key) = api_key {
        let value = format!("Bearer {key}")
            .parse()
            .map_err(|_| Error::Config(format!("{service} API key is not a valid header value")))?;
        request.headers_mut().insert("authorization", value);
    }

    Ok(request)
}
