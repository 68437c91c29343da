use subnet_protocol::InfoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ledger returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("undecodable commitment: {0}")]
    Decode(#[from] InfoError),
    #[error("ledger read timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no peer answered ({peers} asked)")]
    Unreachable { peers: usize },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("storage returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("peer state manager has stopped")]
    Stopped,
}
