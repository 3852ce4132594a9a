//! Socket transport: plain TCP or TLS behind one reader/writer pair

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::{
    config::TlsConfig,
    constants::MAX_LINE_LENGTH,
    error::{AmiError, AmiResult},
};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolve the configured host.
pub(crate) async fn resolve(host: &str, port: u16, limit: Duration) -> AmiResult<Vec<SocketAddr>> {
    let timeout_ms = limit.as_millis() as u64;
    let addrs = match timeout(limit, tokio::net::lookup_host((host, port))).await {
        Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
        Ok(Err(e)) => {
            return Err(AmiError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => return Err(AmiError::Timeout { timeout_ms }),
    };

    if addrs.is_empty() {
        return Err(AmiError::Resolve {
            host: host.to_string(),
            reason: "no addresses".to_string(),
        });
    }
    debug!("[CONNECT] Resolved {} to {:?}", host, addrs);
    Ok(addrs)
}

/// Establish a TCP connection to the first reachable address, then wrap it
/// in TLS when configured. The timeout covers the whole attempt.
pub(crate) async fn connect(
    host: &str,
    addrs: &[SocketAddr],
    limit: Duration,
    tls: Option<&TlsConfig>,
) -> AmiResult<(LineReader, TransportWriter)> {
    let timeout_ms = limit.as_millis() as u64;
    match timeout(limit, connect_inner(host, addrs, tls)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("[CONNECT] Connect timed out after {}ms", timeout_ms);
            Err(AmiError::Timeout { timeout_ms })
        }
    }
}

async fn connect_inner(
    host: &str,
    addrs: &[SocketAddr],
    tls: Option<&TlsConfig>,
) -> AmiResult<(LineReader, TransportWriter)> {
    let stream = tcp_connect(addrs).await?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[CONNECT] Could not set TCP_NODELAY: {}", e);
    }

    let Some(tls) = tls else {
        let (read_half, write_half) = stream.into_split();
        return Ok((
            LineReader::new(Box::new(read_half)),
            TransportWriter::new(Box::new(write_half)),
        ));
    };

    let name = tls
        .server_name()
        .unwrap_or(host)
        .to_string();
    let server_name = ServerName::try_from(name).map_err(|e| AmiError::Tls(e.to_string()))?;
    let connector = TlsConnector::from(tls.client_config());
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| AmiError::Tls(e.to_string()))?;
    debug!("[CONNECT] TLS handshake complete");

    let (read_half, write_half) = tokio::io::split(tls_stream);
    Ok((
        LineReader::new(Box::new(read_half)),
        TransportWriter::new(Box::new(write_half)),
    ))
}

async fn tcp_connect(addrs: &[SocketAddr]) -> AmiResult<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("[CONNECT] TCP connection established to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("[CONNECT] TCP connect to {} failed: {}", addr, e);
                last_error = Some(AmiError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Err(last_error.unwrap_or_else(|| AmiError::Connect {
        addr: String::new(),
        reason: "no addresses".to_string(),
    }))
}

/// Read half of the transport, one line per call.
pub(crate) struct LineReader {
    inner: BufReader<BoxedRead>,
}

impl LineReader {
    fn new(inner: BoxedRead) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Next line including its terminator, or `None` once the peer closed.
    ///
    /// A partial line cut off by EOF counts as closed. Invalid UTF-8 is
    /// replaced rather than rejected, since switches relay caller names in
    /// whatever encoding the phones used.
    pub(crate) async fn next_line(&mut self) -> AmiResult<Option<String>> {
        let mut buf = Vec::new();
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() > MAX_LINE_LENGTH {
                return Err(AmiError::protocol_error(format!(
                    "line exceeds {} bytes",
                    MAX_LINE_LENGTH
                )));
            }
            return Ok(None);
        }

        Ok(Some(
            String::from_utf8_lossy(&buf).into_owned(),
        ))
    }
}

/// Write half of the transport.
pub(crate) struct TransportWriter {
    inner: BoxedWrite,
}

impl TransportWriter {
    fn new(inner: BoxedWrite) -> Self {
        Self { inner }
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) -> AmiResult<()> {
        self.inner
            .write_all(bytes)
            .await?;
        self.inner
            .flush()
            .await?;
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        if let Err(e) = self
            .inner
            .shutdown()
            .await
        {
            debug!("Error shutting down transport: {}", e);
        }
    }
}
