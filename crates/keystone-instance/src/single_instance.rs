//! Single-instance rendezvous
//!
//! The owner holds an exclusive `fs2` lock on `instance.lock` in the user storage
//! root and listens on a loopback TCP port recorded in `instance.port`. A later
//! launch that fails to take the lock connects to that port, sends its paths and
//! exits.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use keystone_core::prelude::*;

use crate::protocol::{self, Ack, LaunchMessage};

const LOCK_FILE: &str = "instance.lock";
const PORT_FILE: &str = "instance.port";

/// How long a forwarding launch waits for the owner to publish its port and ack
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

const PORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Callback run on the listener task for every forwarded launch.
///
/// It must only enqueue work; it runs off the UI-owning thread.
pub type ForwardCallback = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// Outcome of [`SingleInstanceCoordinator::claim_or_forward`]
#[derive(Debug)]
pub enum Claim {
    /// This process owns the rendezvous; keep the value alive for the process lifetime
    Owned(InstanceOwner),
    /// Paths were handed to the running owner; this process should exit
    Forwarded { accepted: usize },
}

/// Detects a live owner and either becomes it or forwards to it.
#[derive(Debug, Clone)]
pub struct SingleInstanceCoordinator {
    dir: PathBuf,
    forward_timeout: Duration,
}

impl SingleInstanceCoordinator {
    /// `dir` is the user storage root shared by every launch of the same user.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    /// Become the owner, or forward `paths` to the existing owner.
    ///
    /// `on_forward` is registered only when this process becomes the owner.
    pub async fn claim_or_forward(
        &self,
        paths: &[PathBuf],
        on_forward: ForwardCallback,
    ) -> Result<Claim> {
        std::fs::create_dir_all(&self.dir)?;

        let lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                let owner = InstanceOwner::start(lock_file, &self.dir, on_forward).await?;
                info!("Became owning instance, listening on {}", owner.addr);
                Ok(Claim::Owned(owner))
            }
            Err(e) => {
                debug!("Instance lock held elsewhere ({}), forwarding", e);
                let accepted = self.forward(paths).await?;
                info!("Forwarded {} path(s) to the running instance", accepted);
                Ok(Claim::Forwarded { accepted })
            }
        }
    }

    /// Send `paths` to the owner and wait for its acknowledgement.
    async fn forward(&self, paths: &[PathBuf]) -> Result<usize> {
        let paths = absolutize(paths)?;
        let message = LaunchMessage {
            first_launch: false,
            paths,
        };

        let exchange = async {
            let addr = wait_for_port(&self.dir.join(PORT_FILE)).await?;
            let stream = TcpStream::connect(addr).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_half
                .write_all(protocol::encode(&message)?.as_bytes())
                .await?;
            write_half.flush().await?;

            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await?.ok_or(Error::ChannelClosed)?;
            let ack: Ack = protocol::decode(&line)?;
            Ok::<usize, Error>(ack.accepted)
        };

        tokio::time::timeout(self.forward_timeout, exchange)
            .await
            .map_err(|_| Error::instance("timed out forwarding to the running instance"))?
    }
}

/// Held by the owning process. Dropping it stops the listener and releases the lock.
pub struct InstanceOwner {
    addr: SocketAddr,
    port_file: PathBuf,
    accept_task: JoinHandle<()>,
    // NOTE(lifetime): held to keep the exclusive lock; released on drop
    _lock_file: File,
}

impl std::fmt::Debug for InstanceOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOwner")
            .field("addr", &self.addr)
            .field("port_file", &self.port_file)
            .finish()
    }
}

impl InstanceOwner {
    async fn start(lock_file: File, dir: &Path, on_forward: ForwardCallback) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| Error::instance(format!("failed to bind rendezvous socket: {}", e)))?;
        let addr = listener.local_addr()?;

        // Publish the port last, once the listener accepts connections
        let port_file = dir.join(PORT_FILE);
        let temp = dir.join(".instance.port.tmp");
        std::fs::write(&temp, addr.to_string())?;
        std::fs::rename(&temp, &port_file)?;

        let accept_task = tokio::spawn(accept_loop(listener, on_forward));

        Ok(Self {
            addr,
            port_file,
            accept_task,
            _lock_file: lock_file,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Err(e) = std::fs::remove_file(&self.port_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.port_file.display(), e);
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, on_forward: ForwardCallback) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let on_forward = on_forward.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, on_forward).await {
                        warn!("Forwarded launch from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Rendezvous accept error: {}", e);
                tokio::time::sleep(PORT_POLL_INTERVAL).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, on_forward: ForwardCallback) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let line = lines.next_line().await?.ok_or(Error::ChannelClosed)?;
    let message: LaunchMessage = protocol::decode(&line)?;

    if message.first_launch {
        warn!("Ignoring first-launch message on an owned rendezvous");
    }

    let accepted = message.paths.len();
    debug!("Received {} forwarded path(s)", accepted);
    on_forward(message.paths);

    write_half
        .write_all(protocol::encode(&Ack { accepted })?.as_bytes())
        .await?;
    write_half.flush().await?;
    Ok(())
}

/// Read the owner's address, waiting for it to be published.
async fn wait_for_port(port_file: &Path) -> Result<SocketAddr> {
    loop {
        if let Ok(content) = tokio::fs::read_to_string(port_file).await {
            if let Ok(addr) = content.trim().parse::<SocketAddr>() {
                return Ok(addr);
            }
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

/// Forwarded paths are resolved against this process's working directory.
fn absolutize(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    Ok(paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect())
}
