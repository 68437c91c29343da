use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{timeout, timeout_at, Instant};

use subnet_protocol::{NetworkId, PeerId, PeerInfo};

use crate::config::FetchConfig;
use crate::error::LedgerError;

/// Read-only access to the commitment ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw commitment a peer published; `None` if it never published one.
    async fn get_commitment(
        &self,
        network_id: NetworkId,
        peer_id: PeerId,
    ) -> Result<Option<String>, LedgerError>;
}

/// Decode a raw commitment into a strict [`PeerInfo`].
pub fn decode_commitment(raw: Option<&str>) -> Result<PeerInfo, LedgerError> {
    match raw {
        Some(raw) => Ok(PeerInfo::parse(raw)?),
        None => Ok(PeerInfo::default()),
    }
}

pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitmentBody {
    #[serde(default)]
    commitment: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_commitment(
        &self,
        network_id: NetworkId,
        peer_id: PeerId,
    ) -> Result<Option<String>, LedgerError> {
        let url = format!("{}/commitments/{}/{}", self.base_url, network_id, peer_id);
        let resp = self.auth(self.http.get(&url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(LedgerError::Status(resp.status()));
        }
        let body: CommitmentBody = resp.json().await?;
        Ok(body.commitment)
    }
}

/// Gathers ledger commitments for a set of peers with bounded parallelism.
///
/// Every requested peer gets an entry in the result. Failed, timed out and
/// undecodable reads all come back as an empty [`PeerInfo`].
pub struct CommitmentFetcher {
    ledger: Arc<dyn LedgerClient>,
    network_id: NetworkId,
    config: FetchConfig,
}

impl CommitmentFetcher {
    pub fn new(ledger: Arc<dyn LedgerClient>, network_id: NetworkId, config: FetchConfig) -> Self {
        Self {
            ledger,
            network_id,
            config,
        }
    }

    pub async fn fetch(&self, peer_ids: &[PeerId]) -> BTreeMap<PeerId, PeerInfo> {
        let deadline = Instant::now() + self.config.deadline;
        let mut reads = stream::iter(peer_ids.iter().copied())
            .map(|peer_id| async move { (peer_id, self.read(peer_id).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut infos = BTreeMap::new();
        loop {
            match timeout_at(deadline, reads.next()).await {
                Ok(Some((peer_id, Ok(info)))) => {
                    infos.insert(peer_id, info);
                }
                Ok(Some((peer_id, Err(LedgerError::Timeout)))) => {
                    tracing::warn!(peer = peer_id, "Timed out reading commitment");
                    infos.insert(peer_id, PeerInfo::default());
                }
                Ok(Some((peer_id, Err(e)))) => {
                    tracing::warn!(peer = peer_id, error = %e, "Failed to get commitment");
                    infos.insert(peer_id, PeerInfo::default());
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        collected = infos.len(),
                        requested = peer_ids.len(),
                        "Ledger deadline passed, remaining peers count as empty"
                    );
                    break;
                }
            }
        }

        for peer_id in peer_ids {
            infos.entry(*peer_id).or_default();
        }
        infos
    }

    async fn read(&self, peer_id: PeerId) -> Result<PeerInfo, LedgerError> {
        let raw = timeout(
            self.config.read_timeout,
            self.ledger.get_commitment(self.network_id, peer_id),
        )
        .await
        .map_err(|_| LedgerError::Timeout)??;
        decode_commitment(raw.as_deref())
    }
}
