//! Framed stream transport.
//!
//! This module provides the low-level plumbing for moving opaque payloads
//! between nodes.  Streams are TCP; everything above this module only sees
//! [`Client::send`] / [`Client::receive`], so a QUIC stream can replace the
//! socket without touching the codec or the connection manager.
//!
//! ## Wire format
//!
//! Every payload on the wire is preceded by an 8-byte header:
//!
//! ```text
//! [1: version] [3: reserved, zero] [4: payload length (u32-be)] [N: payload]
//! ```
//!
//! The reader validates the version and the length against
//! `max_message_size` before reading the payload.  A bad header abandons the
//! connection; there is no attempt to resynchronize.

use {
    crate::{
        config::P2pConfig,
        error::{P2pError, Result},
    },
    log::debug,
    std::{net::SocketAddr, time::Duration},
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpListener, TcpStream,
        },
        sync::Mutex,
        time::timeout,
    },
};

/// Transport protocol version written into every frame header.
pub const TRANSPORT_VERSION: u8 = 1;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct FrameLimits {
    max_message_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl FrameLimits {
    fn from_config(config: &P2pConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Build the frame header for a payload of `len` bytes.
pub fn encode_header(len: usize) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = TRANSPORT_VERSION;
    header[4..].copy_from_slice(&(len as u32).to_be_bytes());
    header
}

/// Validate a frame header and return `(version, payload_len)`.
pub fn parse_header(header: &[u8; HEADER_SIZE], max_message_size: usize) -> Result<(u8, usize)> {
    let version = header[0];
    if version != TRANSPORT_VERSION {
        return Err(P2pError::UnsupportedVersion {
            expected: TRANSPORT_VERSION,
            actual: version,
        });
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len == 0 {
        return Err(P2pError::EmptyMessage);
    }
    if len > max_message_size {
        return Err(P2pError::MessageTooLarge {
            size: len,
            max: max_message_size,
        });
    }
    Ok((version, len))
}

/// Accepts inbound streams on a bound address.
pub struct Listener {
    inner: TcpListener,
    limits: FrameLimits,
}

impl Listener {
    /// Bind the listener.
    pub async fn bind(addr: &str, config: &P2pConfig) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self {
            inner,
            limits: FrameLimits::from_config(config),
        })
    }

    /// The local address the listener is bound to (useful when port = 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Wait for the next inbound stream.
    pub async fn accept(&self) -> Result<Client> {
        let (stream, addr) = self.inner.accept().await?;
        debug!("accepted stream from {}", addr);
        Client::from_stream(stream, addr, self.limits)
    }
}

/// One framed, bidirectional stream.
///
/// Reads and writes are serialized independently, so a receive loop and a
/// send loop may share one client.
pub struct Client {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    remote_addr: SocketAddr,
    limits: FrameLimits,
}

impl Client {
    /// Open a stream to `addr`, bounded by the write deadline.
    pub async fn dial(addr: &str, config: &P2pConfig) -> Result<Self> {
        let limits = FrameLimits::from_config(config);
        let stream = timeout(limits.write_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2pError::WriteTimeout(config.write_timeout_ms))??;
        let remote_addr = stream.peer_addr()?;
        Self::from_stream(stream, remote_addr, limits)
    }

    fn from_stream(
        stream: TcpStream,
        remote_addr: SocketAddr,
        limits: FrameLimits,
    ) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            remote_addr,
            limits,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Write one frame.  Empty and oversized payloads are rejected before
    /// anything touches the socket.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(P2pError::EmptyMessage);
        }
        if data.len() > self.limits.max_message_size {
            return Err(P2pError::MessageTooLarge {
                size: data.len(),
                max: self.limits.max_message_size,
            });
        }
        let header = encode_header(data.len());
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&header).await?;
            writer.write_all(data).await?;
            writer.flush().await
        };
        timeout(self.limits.write_timeout, write)
            .await
            .map_err(|_| P2pError::WriteTimeout(self.limits.write_timeout.as_millis() as u64))??;
        Ok(())
    }

    /// Read one frame and return `(version, payload)`.
    pub async fn receive(&self) -> Result<(u8, Vec<u8>)> {
        let max = self.limits.max_message_size;
        let mut reader = self.reader.lock().await;
        let read = async {
            let mut header = [0u8; HEADER_SIZE];
            reader.read_exact(&mut header).await?;
            let (version, len) = parse_header(&header, max)?;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload).await?;
            Ok::<_, P2pError>((version, payload))
        };
        timeout(self.limits.read_timeout, read)
            .await
            .map_err(|_| P2pError::ReadTimeout(self.limits.read_timeout.as_millis() as u64))?
    }

    /// Shut down the write side; the remote sees EOF.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
