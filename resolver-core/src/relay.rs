//! Forwarding unresolved queries to the upstream resolver.
//!
//! Each call to `forward` owns a fresh ephemeral UDP socket for the
//! lifetime of one query's retry sequence. Correlation is by socket,
//! not by a shared transaction-ID pool: the client's original
//! transaction ID is sent upstream unchanged, so no relay-side ID
//! rewriting is needed and there is nothing for concurrent queries to
//! collide over.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Per-attempt timeout waiting for the upstream to answer.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Total attempts made (including the first), all using the same
/// transaction ID.
pub const MAX_RETRIES: u32 = 3;

const MAX_DATAGRAM: usize = 512;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RelayError {
    Timeout,
    NetworkError,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RelayError::Timeout => write!(f, "upstream did not respond in time"),
            RelayError::NetworkError => write!(f, "network error talking to upstream"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Forward a raw, already-serialised query to `upstream` and return
/// the raw response bytes, retrying up to `MAX_RETRIES` times on
/// timeout. Stray datagrams (wrong transaction ID) are discarded and
/// do not count as a response.
///
/// # Errors
///
/// `RelayError::NetworkError` if the local socket cannot be bound, or
/// if a send to the upstream fails (not retried). `RelayError::Timeout`
/// if no matching response arrives within `QUERY_TIMEOUT` on every
/// attempt.
pub async fn forward(raw_query: &[u8], upstream: SocketAddr) -> Result<Vec<u8>, RelayError> {
    if raw_query.len() < 2 {
        return Err(RelayError::NetworkError);
    }
    let request_id = [raw_query[0], raw_query[1]];

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|_| RelayError::NetworkError)?;
    socket
        .connect(upstream)
        .await
        .map_err(|_| RelayError::NetworkError)?;

    for _attempt in 0..MAX_RETRIES {
        socket
            .send(raw_query)
            .await
            .map_err(|_| RelayError::NetworkError)?;

        match attempt_receive(&socket, request_id).await {
            Some(response) => return Ok(response),
            None => continue,
        }
    }

    Err(RelayError::Timeout)
}

/// Wait up to `QUERY_TIMEOUT` for a response whose ID matches, reading
/// and discarding any stray datagrams in the meantime.
async fn attempt_receive(socket: &UdpSocket, request_id: [u8; 2]) -> Option<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + QUERY_TIMEOUT;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = match timeout(remaining, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => return None,
        };
        buf.truncate(n);

        if buf.len() >= 2 && buf[0] == request_id[0] && buf[1] == request_id[1] {
            return Some(buf);
        }
        // stray datagram with a mismatched ID: keep waiting until the deadline.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdpSocket;

    async fn spawn_echo_server() -> SocketAddr {
        let socket = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            if let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], peer).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn forwards_and_returns_matching_response() {
        let upstream = spawn_echo_server().await;
        let query = vec![0xAB, 0xCD, 1, 2, 3];

        let response = forward(&query, upstream).await.unwrap();
        assert_eq!(response, query);
    }

    #[tokio::test]
    async fn times_out_when_upstream_is_unreachable() {
        // Reserve a UDP port and drop the socket, so nothing answers it.
        let reserved = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let query = vec![0x00, 0x01, 1, 2, 3];
        let result = forward(&query, addr).await;
        assert_eq!(result, Err(RelayError::Timeout));
    }

    #[tokio::test]
    async fn rejects_too_short_query() {
        let upstream = spawn_echo_server().await;
        let result = forward(&[0x01], upstream).await;
        assert_eq!(result, Err(RelayError::NetworkError));
    }
}
