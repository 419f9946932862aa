//! Remote pipe transport.
//!
//! One unframed byte stream per `(host, port)`. The writing side dials once,
//! streams everything, and closes; the reading side listens, accepts one
//! connection, and reads until end-of-stream. Either side may start first,
//! so the writer retries its connection and the reader retries its bind.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("could not listen on {addr} after {attempts} attempts: {source}")]
    Bind {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retry policy for establishing a remote pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            attempts: config.connect_retries.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// Dial `host:port` and stream all of `reader` into it. Returns bytes sent.
#[tracing::instrument(level = "debug", skip(reader, policy), err)]
pub async fn remote_write<R>(host: &str, port: u16, reader: &mut R, policy: RetryPolicy) -> Result<u64, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let addr = format!("{host}:{port}");
    let mut stream = connect_with_retry(&addr, policy).await?;
    let sent = tokio::io::copy(reader, &mut stream).await?;
    stream.shutdown().await?;
    tracing::debug!(addr = %addr, bytes = sent, "remote write finished");
    Ok(sent)
}

/// Listen on `host:port`, accept one connection, and stream it into
/// `writer` until end-of-stream. Returns bytes received.
#[tracing::instrument(level = "debug", skip(writer, policy), err)]
pub async fn remote_read<W>(host: &str, port: u16, writer: &mut W, policy: RetryPolicy) -> Result<u64, TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let addr = format!("{host}:{port}");
    let listener = bind_with_retry(&addr, policy).await?;
    accept_one(&listener, writer).await
}

/// Accept a single connection on an already bound listener and drain it.
pub async fn accept_one<W>(listener: &TcpListener, writer: &mut W) -> Result<u64, TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let (mut stream, peer) = listener.accept().await?;
    tracing::debug!(peer = %peer, "remote pipe connected");
    let received = tokio::io::copy(&mut stream, writer).await?;
    writer.flush().await?;
    Ok(received)
}

async fn connect_with_retry(addr: &str, policy: RetryPolicy) -> Result<TcpStream, TransportError> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) if attempt >= policy.attempts => {
                return Err(TransportError::Connect {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                tracing::trace!(addr, attempt, error = %e, "connect failed, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

async fn bind_with_retry(addr: &str, policy: RetryPolicy) -> Result<TcpListener, TransportError> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(source) if attempt >= policy.attempts => {
                return Err(TransportError::Bind {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                tracing::trace!(addr, attempt, error = %e, "bind failed, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = RemoteConfig::default();
        config.connect_retries = 0;
        config.retry_delay_ms = 7;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(7));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            let n = accept_one(&listener, &mut received).await.unwrap();
            (n, received)
        });

        let payload = b"line one\nline two\n".to_vec();
        let sent = remote_write("127.0.0.1", port, &mut payload.as_slice(), quick())
            .await
            .unwrap();
        let (received_len, received) = reader.await.unwrap();

        assert_eq!(sent, payload.len() as u64);
        assert_eq!(received_len, sent);
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            accept_one(&listener, &mut received).await.unwrap()
        });

        let sent = remote_write("127.0.0.1", port, &mut tokio::io::empty(), quick())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert_eq!(reader.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = remote_write("127.0.0.1", port, &mut tokio::io::empty(), quick())
            .await
            .unwrap_err();
        match err {
            TransportError::Connect { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected connect error, got {other:?}"),
        }
    }
}
