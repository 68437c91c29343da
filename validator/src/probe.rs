use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use subnet_protocol::{PeerId, PeerInfo, ProbeRequest, ProbeResponse, Topology};

use crate::error::ProbeError;

/// Slack on top of the batch timeout before the prober gives up on the client
const CLIENT_GRACE: Duration = Duration::from_millis(500);

/// Request/response messaging to peers
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Send `request` to every address within `timeout`.
    ///
    /// The result is aligned with `addresses`; `None` where a peer did not answer.
    async fn query(
        &self,
        addresses: &[String],
        request: &ProbeRequest,
        timeout: Duration,
    ) -> Result<Vec<Option<ProbeResponse>>, ProbeError>;
}

/// Resolves peers to network addresses
pub trait PeerDirectory: Send + Sync {
    fn address_of(&self, peer_id: PeerId) -> Option<String>;
}

impl PeerDirectory for Topology {
    fn address_of(&self, peer_id: PeerId) -> Option<String> {
        Topology::address_of(self, peer_id).map(str::to_string)
    }
}

pub struct HttpNetworkClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl HttpNetworkClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }

    async fn ask(
        &self,
        address: &str,
        request: &ProbeRequest,
        timeout: Duration,
    ) -> anyhow::Result<ProbeResponse> {
        let url = format!("http://{address}/info");
        let mut req = self.http.post(&url).timeout(timeout).json(request);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Peer returned HTTP {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    async fn query(
        &self,
        addresses: &[String],
        request: &ProbeRequest,
        timeout: Duration,
    ) -> Result<Vec<Option<ProbeResponse>>, ProbeError> {
        let asks = addresses.iter().map(|address| async move {
            match self.ask(address, request, timeout).await {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::debug!(addr = %address, error = %e, "Peer did not answer probe");
                    None
                }
            }
        });
        let responses = join_all(asks).await;
        if !addresses.is_empty() && responses.iter().all(Option::is_none) {
            return Err(ProbeError::Unreachable {
                peers: addresses.len(),
            });
        }
        Ok(responses)
    }
}

/// Asks peers without a ledger commitment to describe themselves, in one batch.
pub struct NetworkProber {
    network: Arc<dyn NetworkClient>,
    directory: Arc<dyn PeerDirectory>,
    timeout: Duration,
}

impl NetworkProber {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        directory: Arc<dyn PeerDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            directory,
            timeout,
        }
    }

    /// Probe `peer_ids`. Peers that did not answer are absent from the result;
    /// peers whose answer could not be decoded map to an empty [`PeerInfo`].
    pub async fn probe(&self, peer_ids: &[PeerId]) -> BTreeMap<PeerId, PeerInfo> {
        let mut infos = BTreeMap::new();
        let mut targets = Vec::with_capacity(peer_ids.len());
        let mut addresses = Vec::with_capacity(peer_ids.len());
        for &peer_id in peer_ids {
            match self.directory.address_of(peer_id) {
                Some(address) => {
                    targets.push(peer_id);
                    addresses.push(address);
                }
                None => tracing::warn!(peer = peer_id, "No address known for peer, not probing"),
            }
        }
        if targets.is_empty() {
            return infos;
        }

        tracing::info!(peers = targets.len(), "Requesting peer info");
        let request = ProbeRequest::describe();
        let responses = match timeout(
            self.timeout + CLIENT_GRACE,
            self.network.query(&addresses, &request, self.timeout),
        )
        .await
        {
            Ok(Ok(responses)) => responses,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Peer info request failed");
                return infos;
            }
            Err(_) => {
                tracing::warn!(peers = targets.len(), "Peer info request timed out");
                return infos;
            }
        };
        if responses.len() != targets.len() {
            tracing::warn!(
                expected = targets.len(),
                got = responses.len(),
                "Probe responses do not line up with the request"
            );
        }

        for (peer_id, response) in targets.into_iter().zip(responses) {
            let Some(response) = response else {
                continue;
            };
            let info = PeerInfo::from_value(response.info).unwrap_or_else(|e| {
                tracing::warn!(peer = peer_id, error = %e, "Malformed peer info");
                PeerInfo::default()
            });
            infos.insert(peer_id, info);
        }
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNetwork {
        answers: HashMap<String, Value>,
        hang: bool,
        fail: bool,
        asked: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl NetworkClient for FakeNetwork {
        async fn query(
            &self,
            addresses: &[String],
            request: &ProbeRequest,
            _timeout: Duration,
        ) -> Result<Vec<Option<ProbeResponse>>, ProbeError> {
            assert!(request.get_miner_info);
            self.asked.lock().unwrap().push(addresses.to_vec());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(ProbeError::Unreachable {
                    peers: addresses.len(),
                });
            }
            Ok(addresses
                .iter()
                .map(|a| self.answers.get(a).cloned().map(|info| ProbeResponse { info }))
                .collect())
        }
    }

    struct Directory;

    impl PeerDirectory for Directory {
        fn address_of(&self, peer_id: PeerId) -> Option<String> {
            (peer_id < 100).then(|| format!("10.0.0.{peer_id}:8091"))
        }
    }

    fn prober(network: Arc<FakeNetwork>) -> NetworkProber {
        NetworkProber::new(network, Arc::new(Directory), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn one_malformed_answer_does_not_spoil_the_batch() {
        let mut network = FakeNetwork::default();
        network
            .answers
            .insert("10.0.0.1:8091".into(), json!({"model_name": "sdxl"}));
        network
            .answers
            .insert("10.0.0.2:8091".into(), json!({"model_name": 7, "junk": true}));
        network
            .answers
            .insert("10.0.0.3:8091".into(), json!({"model_name": "supir", "total_volume": 80}));
        network
            .answers
            .insert("10.0.0.5:8091".into(), json!(["sdxl", 5000, 0, {"gpu": "x"}]));
        let infos = prober(Arc::new(network)).probe(&[1, 2, 3, 4, 5]).await;

        assert_eq!(infos[&1].model_name(), "sdxl");
        assert!(infos[&2].is_empty());
        assert_eq!(infos[&3].total_volume(), 80.0);
        assert!(!infos.contains_key(&4));
        assert!(infos[&5].is_empty());
    }

    #[tokio::test]
    async fn only_resolvable_peers_are_asked_in_one_batch() {
        let network = Arc::new(FakeNetwork::default());
        prober(network.clone()).probe(&[5, 200, 6]).await;
        let asked = network.asked.lock().unwrap();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0], vec!["10.0.0.5:8091".to_string(), "10.0.0.6:8091".to_string()]);
    }

    #[tokio::test]
    async fn nothing_to_probe_sends_nothing() {
        let network = Arc::new(FakeNetwork::default());
        assert!(prober(network.clone()).probe(&[]).await.is_empty());
        assert!(network.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_yields_nothing() {
        let network = FakeNetwork {
            fail: true,
            ..Default::default()
        };
        assert!(prober(Arc::new(network)).probe(&[1]).await.is_empty());
    }

    #[tokio::test]
    async fn silent_network_is_unreachable() {
        let client = HttpNetworkClient::new(None);
        let addresses = vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()];
        let err = client
            .query(&addresses, &ProbeRequest::describe(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unreachable { peers: 2 }));
        let empty = client
            .query(&[], &ProbeRequest::describe(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_batch_times_out() {
        let network = FakeNetwork {
            hang: true,
            ..Default::default()
        };
        assert!(prober(Arc::new(network)).probe(&[1, 2]).await.is_empty());
    }
}
