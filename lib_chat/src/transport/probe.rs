use std::time::Duration;

use tokio::net::TcpStream;
use url::{Host, Url};

/// # Probe Endpoint
///
/// Open (and immediately drop) a TCP connection to the delivery endpoint's host
/// and port, bounded by `timeout`. A reconnect attempt only proceeds to the
/// token fetch and handshake when this succeeds.
pub async fn probe_endpoint(url: &Url, timeout: Duration) -> bool {
    let Some(port) = url.port_or_known_default() else {
        log::warn!("Cannot probe {}: no port", url);
        return false;
    };

    let connect = async {
        match url.host() {
            Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await,
            Some(Host::Ipv4(addr)) => TcpStream::connect((addr, port)).await,
            Some(Host::Ipv6(addr)) => TcpStream::connect((addr, port)).await,
            None => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "URL has no host")),
        }
    };

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            log::debug!("Liveness probe to {} failed: {}", url, e);
            false
        }
        Err(_) => {
            log::debug!("Liveness probe to {} timed out after {:?}", url, timeout);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn succeeds_against_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();
        assert!(probe_endpoint(&url, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn fails_against_a_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
        assert!(!probe_endpoint(&url, Duration::from_millis(500)).await);
    }
}
