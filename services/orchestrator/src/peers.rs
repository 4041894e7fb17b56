//! Peer-address source for bootstrap discovery.
//!
//! The source publishes the seed nodes' libp2p addresses as one
//! comma-separated text body, e.g.
//! `/ip4/1.2.3.4/tcp/10300/ipfs/QmA,/ip4/5.6.7.8/tcp/10300/ipfs/QmB`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

/// Peer source errors.
#[derive(Debug, Error)]
pub enum PeerSourceError {
    #[error("failed to fetch peer addresses: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer address source returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Provider of the externally published peer addresses.
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn fetch_peer_addresses(&self) -> Result<Vec<String>, PeerSourceError>;
}

/// Split a comma-separated address list, trimming entries and dropping blanks.
pub fn parse_peer_list(body: &str) -> Vec<String> {
    body.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Last non-empty `/`-separated segment of a peer address: its identity.
pub fn peer_identity(address: &str) -> Option<&str> {
    address.rsplit('/').find(|s| !s.is_empty())
}

/// Fetches the list over HTTP(S).
pub struct HttpPeerSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPeerSource {
    pub fn new(url: impl Into<String>) -> Result<Self, PeerSourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PeerSource for HttpPeerSource {
    async fn fetch_peer_addresses(&self) -> Result<Vec<String>, PeerSourceError> {
        debug!(url = %self.url, "Fetching peer addresses");

        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(status, body = %body, "Failed to fetch peer addresses");
            return Err(PeerSourceError::Status { status, body });
        }

        let body = response.text().await?;
        let peers = parse_peer_list(&body);
        debug!(peer_count = peers.len(), "Fetched peer addresses");
        Ok(peers)
    }
}

/// A fixed list, for tests and air-gapped setups.
#[derive(Debug, Clone, Default)]
pub struct StaticPeerSource {
    peers: Vec<String>,
}

impl StaticPeerSource {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PeerSource for StaticPeerSource {
    async fn fetch_peer_addresses(&self) -> Result<Vec<String>, PeerSourceError> {
        Ok(self.peers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_peer_list() {
        let peers = parse_peer_list(" /ip4/1.1.1.1/tcp/1/ipfs/QmA ,/ip4/2.2.2.2/tcp/1/ipfs/QmB,, ");
        assert_eq!(
            peers,
            vec!["/ip4/1.1.1.1/tcp/1/ipfs/QmA", "/ip4/2.2.2.2/tcp/1/ipfs/QmB"]
        );
    }

    #[test]
    fn test_peer_identity() {
        assert_eq!(peer_identity("/ip4/1.1.1.1/tcp/1/ipfs/QmA"), Some("QmA"));
        assert_eq!(peer_identity("/ip4/1.1.1.1/tcp/1/ipfs/QmA/"), Some("QmA"));
        assert_eq!(peer_identity("QmOnly"), Some("QmOnly"));
        assert_eq!(peer_identity("///"), None);
    }

    #[tokio::test]
    async fn test_http_peer_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap_addresses.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "/ip4/1.1.1.1/tcp/10300/ipfs/QmA, /ip4/2.2.2.2/tcp/10300/ipfs/QmB",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let source =
            HttpPeerSource::new(format!("{}/bootstrap_addresses.json", server.uri())).unwrap();
        let peers = source.fetch_peer_addresses().await.unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peer_identity(&peers[1]), Some("QmB"));
    }

    #[tokio::test]
    async fn test_http_peer_source_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let source = HttpPeerSource::new(server.uri()).unwrap();
        let err = source.fetch_peer_addresses().await.unwrap_err();

        match err {
            PeerSourceError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
