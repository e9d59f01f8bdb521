// src/rpc/tunnel.rs

//! SSH-based reverse-tunnel dialer (§4.3 step 3, §6 "Reverse-tunnel
//! dialer"). `ssh2` is a synchronous libssh2 binding, so all channel I/O
//! happens on a dedicated background thread; the async side only ever
//! touches tokio mpsc channels, the same idiom the teacher uses to bridge
//! `mlua`'s blocking Lua calls behind an async boundary in
//! `core/scripting` — never call a blocking API from inside a
//! `Future::poll`, always hand it a whole thread.
//!
//! Rather than teach tonic's connector machinery about a non-socket
//! transport, the resolver opens a loopback `TcpListener`, accepts one
//! connection per dial, and pumps bytes between it and the SSH-forwarded
//! channel with `tokio::io::copy_bidirectional`. The gRPC client then
//! dials the loopback address exactly as it would dial a direct authority
//! address, just with the TLS domain name pinned to the real authority
//! hostname so certificate verification still succeeds.

use crate::core::errors::GatewayError;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SshTunnelConfig {
    pub ssh_addr: String,
    pub username: String,
    pub private_key_path: std::path::PathBuf,
    /// The authority address to reach through the reverse tunnel, as seen
    /// from the far side of the SSH carrier (`host:port`).
    pub remote_authority_addr: String,
}

impl SshTunnelConfig {
    /// The hostname the forwarded connection's TLS handshake should
    /// present, since the gRPC client physically dials a loopback address.
    pub fn tls_server_name(&self) -> String {
        self.remote_authority_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| self.remote_authority_addr.clone())
    }
}

const CHUNK_SIZE: usize = 16 * 1024;
const CHANNEL_CAPACITY: usize = 64;
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Resolves and caches a reverse-tunnel endpoint, per §6's "wrapped with a
/// cached resolver". The SSH session is established once and reused; each
/// call to `open_local_forward` opens a fresh forwarded channel and a
/// fresh loopback listener for the gRPC client to dial.
pub struct TunnelResolver {
    config: SshTunnelConfig,
    session: Arc<AsyncMutex<Option<Session>>>,
}

impl TunnelResolver {
    pub fn new(config: SshTunnelConfig) -> Self {
        Self {
            config,
            session: Arc::new(AsyncMutex::new(None)),
        }
    }

    /// Opens (or reuses) the SSH session, forwards a channel to the remote
    /// authority address, and returns a loopback address the gRPC client
    /// can dial as if it were a direct connection.
    pub async fn open_local_forward(&self) -> Result<SocketAddr, GatewayError> {
        let config = self.config.clone();
        let session_slot = self.session.clone();

        // `Channel<'sess>` borrows the `Session` it came from. We clone the
        // session (ssh2's `Session` is an `Arc`-backed handle onto the same
        // connection) and move the clone alongside the channel so the
        // borrowed data stays alive for as long as the channel does, then
        // erase the lifetime so both can cross into the spawned task below.
        let (channel, _session_keepalive) = tokio::task::spawn_blocking(
            move || -> Result<(ssh2::Channel<'static>, Session), GatewayError> {
                let mut slot = session_slot.blocking_lock();
                if slot.is_none() {
                    *slot = Some(Self::open_session(&config)?);
                }
                let session = slot.as_ref().expect("just populated");

                let (remote_host, remote_port) = split_host_port(&config.remote_authority_addr)?;
                let channel = session
                    .channel_direct_tcpip(&remote_host, remote_port, None)
                    .map_err(GatewayError::from)?;
                session.set_blocking(false);
                debug!(target = %config.remote_authority_addr, "opened SSH-forwarded channel");

                let session_keepalive = session.clone();
                // SAFETY: `session_keepalive` shares the same underlying
                // connection as the session `channel` borrows from and is
                // moved out together with it, so the borrow stays valid for
                // the lifetime of the returned tuple.
                let channel: ssh2::Channel<'static> = unsafe { std::mem::transmute(channel) };
                Ok((channel, session_keepalive))
            },
        )
        .await
        .map_err(|e| GatewayError::Internal(format!("tunnel dial task panicked: {e}")))??;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            let _session_keepalive = _session_keepalive;
            let (mut tcp_stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "tunnel loopback listener failed to accept");
                    return;
                }
            };
            let mut tunnel_io = TunnelIo::spawn(channel);
            if let Err(e) =
                tokio::io::copy_bidirectional(&mut tcp_stream, &mut tunnel_io).await
            {
                debug!(error = %e, "tunnel forward closed");
            }
        });

        Ok(local_addr)
    }

    fn open_session(config: &SshTunnelConfig) -> Result<Session, GatewayError> {
        let tcp = StdTcpStream::connect(&config.ssh_addr)
            .map_err(|e| GatewayError::Transient(format!("ssh dial {}: {e}", config.ssh_addr)))?;
        let mut session = Session::new().map_err(GatewayError::from)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(GatewayError::from)?;
        session
            .userauth_pubkey_file(&config.username, None, &config.private_key_path, None)
            .map_err(GatewayError::from)?;
        if !session.authenticated() {
            return Err(GatewayError::Transient(
                "ssh authentication did not succeed".into(),
            ));
        }
        Ok(session)
    }
}

/// Async byte stream backed by an SSH-forwarded channel pumped on a
/// dedicated background thread. `poll_read`/`poll_write` only ever touch
/// tokio mpsc channels, never a blocking syscall.
struct TunnelIo {
    read_rx: mpsc::Receiver<Vec<u8>>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: Vec<u8>,
}

impl TunnelIo {
    fn spawn(channel: ssh2::Channel) -> Self {
        let (read_tx, read_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        std::thread::spawn(move || Self::pump(channel, read_tx, write_rx));

        Self {
            read_rx,
            write_tx,
            pending: Vec::new(),
        }
    }

    /// Runs on its own OS thread for the channel's lifetime, alternating
    /// non-blocking reads and writes against the (non-blocking-mode) ssh2
    /// channel. This is the standard pattern for bridging a non-blocking
    /// libssh2 channel into an event loop that isn't libssh2's own.
    fn pump(
        mut channel: ssh2::Channel,
        read_tx: mpsc::Sender<Vec<u8>>,
        mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let mut made_progress = false;

            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    made_progress = true;
                    if read_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!(error = %e, "ssh tunnel channel read failed");
                    break;
                }
            }

            if let Ok(chunk) = write_rx.try_recv() {
                made_progress = true;
                if let Err(e) = channel.write_all(&chunk) {
                    warn!(error = %e, "ssh tunnel channel write failed");
                    break;
                }
            }

            if !made_progress {
                std::thread::sleep(POLL_IDLE_SLEEP);
            }
        }
        let _ = channel.close();
    }
}

impl tokio::io::AsyncRead for TunnelIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            let drained: Vec<u8> = self.pending.drain(..n).collect();
            buf.put_slice(&drained);
            return Poll::Ready(Ok(()));
        }

        match self.read_rx.poll_recv(cx) {
            Poll::Ready(Some(mut chunk)) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.pending = chunk.split_off(n);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl tokio::io::AsyncWrite for TunnelIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.write_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::other("tunnel pump thread gone"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16), GatewayError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::BadParameter(format!("invalid address {addr}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| GatewayError::BadParameter(format!("invalid port in {addr}")))?;
    Ok((host.to_string(), port))
}
