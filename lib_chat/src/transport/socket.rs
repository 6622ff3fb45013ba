//! # Connection Attempt
//!
//! One attempt to reach `open`: liveness probe, fresh token, WebSocket upgrade
//! with the token as a query parameter. Each failure is classified into an
//! [`AttemptFailure`] for the connection manager.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::probe::probe_endpoint;
use crate::configs::LinkConfig;
use crate::core::{AttemptFailure, TokenProvider};

/// The client WebSocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The endpoint URL with `token` set as a query parameter (replacing any
/// existing one).
pub fn handshake_url(base: &Url, token: &str) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("token", token);
    }
    url
}

/// # Attempt Connection
///
/// Run one full attempt against `config.realtime_url`.
pub async fn attempt_connection<T: TokenProvider>(config: &LinkConfig, tokens: &T) -> Result<WsStream, AttemptFailure> {
    if !probe_endpoint(&config.realtime_url, config.probe_timeout).await {
        return Err(AttemptFailure::ProbeFailed);
    }

    let token = tokens.fetch_token().await.map_err(AttemptFailure::from)?;
    let url = handshake_url(&config.realtime_url, &token);
    log::debug!("Opening WebSocket to {}", config.realtime_url);

    match tokio::time::timeout(config.handshake_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(WsError::Http(response))) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => Err(AttemptFailure::HandshakeRejected(format!("HTTP {}", status))),
                code => Err(AttemptFailure::HandshakeFailed(format!("HTTP {}", code))),
            }
        }
        Ok(Err(e)) => Err(AttemptFailure::HandshakeFailed(e.to_string())),
        Err(_) => Err(AttemptFailure::HandshakeFailed(format!(
            "handshake timed out after {:?}",
            config.handshake_timeout
        ))),
    }
}
