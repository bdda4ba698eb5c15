use thiserror::Error;

use crate::domain::PeerAddr;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("registry {addr} unreachable: {source}")]
    RegistryUnreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {peer} unreachable: {source}")]
    PeerUnreachable {
        peer: PeerAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {peer} timed out")]
    PeerTimeout { peer: PeerAddr },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{name}: missing parts {missing:?}")]
    MissingParts { name: String, missing: Vec<usize> },

    #[error("range ended early: expected {expected} bytes, received {received}")]
    ShortRange { expected: u64, received: u64 },

    #[error("no peers to fetch {0} from")]
    NoPeers(String),

    #[error("content not listed by registry: {0}")]
    UnknownContent(String),

    #[error("Config error: {0}")]
    Config(String),
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, MeshError>;
