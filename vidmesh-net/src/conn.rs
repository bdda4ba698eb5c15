//! Small socket helpers shared by the services.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::net::TcpStream;
use vidmesh_core::domain::PeerAddr;
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::wire::MAX_LINE;

/// Next command line, or `None` once the other side has closed.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let n = reader.take(MAX_LINE as u64).read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if n == MAX_LINE && !line.ends_with('\n') {
        return Err(MeshError::Protocol("command line too long".into()));
    }
    Ok(Some(line))
}

pub async fn connect_registry(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(source)) => Err(MeshError::RegistryUnreachable {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(MeshError::RegistryUnreachable {
            addr: addr.to_string(),
            source: std::io::ErrorKind::TimedOut.into(),
        }),
    }
}

pub async fn connect_peer(peer: &PeerAddr, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((peer.host.as_str(), peer.port))).await
    {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(source)) => Err(MeshError::PeerUnreachable {
            peer: peer.clone(),
            source,
        }),
        Err(_) => Err(MeshError::PeerTimeout { peer: peer.clone() }),
    }
}
