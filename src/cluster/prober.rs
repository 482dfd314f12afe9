use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::ConsensusError;
use crate::Result;

/// Dials a configured server and reports the address it answered on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerProber: Send + Sync + 'static {
    async fn probe(
        &self,
        address: &str,
    ) -> Result<String>;
}

/// Plain TCP connect with a timeout; the resolved peer address is the
/// remote end of the connection.
#[derive(Debug, Clone)]
pub struct TcpPeerProber {
    timeout: Duration,
}

impl TcpPeerProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PeerProber for TcpPeerProber {
    async fn probe(
        &self,
        address: &str,
    ) -> Result<String> {
        let stream = timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConsensusError::Timeout)??;
        Ok(stream.peer_addr()?.to_string())
    }
}
