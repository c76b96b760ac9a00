//! The public facade: a synchronous API over an async socket connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;

use crate::codec;
use crate::config::Config;
use crate::connection::Endpoint;
use crate::error::{Error, Result};
use crate::handshake;
use crate::query::{run_query_task, QueryChannel};
use crate::rank::RankSelector;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ServerRole {
    remote_size: usize,
    endpoints: Vec<Endpoint>,
    channel: Arc<QueryChannel>,
    rearm: Vec<mpsc::UnboundedSender<()>>,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

struct ClientRole {
    endpoint: Endpoint,
    own_rank: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

enum Role {
    Server(ServerRole),
    Client(ClientRole),
}

/// A rank-addressed, point-to-point socket connection between two
/// participants' local communicators.
///
/// One side calls [`Communicator::accept_connection`] (and must be a
/// singleton, `local_size == 1`); the other calls
/// [`Communicator::request_connection`]. After that handshake, both sides
/// exchange typed frames with the `send_*`/`receive_*` methods, addressing
/// the other side's ranks directly.
///
/// Every method here is synchronous: internally each role owns a private
/// Tokio runtime and drives it with [`Handle::block_on`], so the type can be
/// dropped into call sites that know nothing about async Rust.
pub struct Communicator {
    config: Config,
    role: OnceCell<Role>,
    connected: AtomicBool,
}

impl Communicator {
    /// Creates an unbound communicator. Call exactly one of
    /// [`accept_connection`](Self::accept_connection) or
    /// [`request_connection`](Self::request_connection) before using it.
    pub fn new(config: Config) -> Self {
        Self { config, role: OnceCell::new(), connected: AtomicBool::new(false) }
    }

    /// Binds this communicator as the acceptor. The local communicator must
    /// be a singleton; the remote communicator's size is learned from the
    /// handshake and may be anything greater than zero.
    pub fn accept_connection(&self) -> Result<()> {
        if self.role.get().is_some() {
            return Err(Error::Configuration("communicator is already bound to a role".into()));
        }
        if self.config.local_size != 1 {
            return Err(Error::Configuration(format!(
                "acceptor must have a singleton local communicator, got size {}",
                self.config.local_size
            )));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("coupling-net-acceptor")
            .build()
            .map_err(Error::Transport)?;
        let handle = runtime.handle().clone();

        let mut accepted = handle.block_on(handshake::accept(&self.config))?;
        let mut rearm_rx = Vec::with_capacity(accepted.endpoints.len());
        for rank in 0..accepted.endpoints.len() {
            let rx = accepted.rearm_rx[rank]
                .take()
                .expect("rearm receiver is populated once per rank by the handshake");
            rearm_rx.push(rx);
        }
        for (rank, rx) in rearm_rx.into_iter().enumerate() {
            let endpoint = accepted.endpoints[rank].clone();
            let channel = accepted.channel.clone();
            handle.spawn(run_query_task(rank, endpoint, channel, rx));
        }

        let role = Role::Server(ServerRole {
            remote_size: accepted.remote_size,
            endpoints: accepted.endpoints,
            channel: accepted.channel,
            rearm: std::mem::take(&mut accepted.rearm_tx),
            handle,
            runtime: Mutex::new(Some(runtime)),
        });
        self.role.set(role).unwrap_or_else(|_| unreachable!("role is only ever set once, guarded above"));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Binds this communicator as the requester, dialing the acceptor and
    /// retrying until it answers or the connect attempt budget runs out.
    pub fn request_connection(&self) -> Result<()> {
        if self.role.get().is_some() {
            return Err(Error::Configuration("communicator is already bound to a role".into()));
        }
        if self.config.local_size == 0 {
            return Err(Error::Configuration("local communicator size must be at least 1".into()));
        }

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Transport)?;
        let handle = runtime.handle().clone();

        let (endpoint, own_rank) = handle.block_on(handshake::connect(&self.config))?;
        let role = Role::Client(ClientRole { endpoint, own_rank, handle, runtime: Mutex::new(Some(runtime)) });
        self.role.set(role).unwrap_or_else(|_| unreachable!("role is only ever set once, guarded above"));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether a handshake has completed and the connection hasn't since
    /// been closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Size of the remote communicator: whatever the requester reported
    /// during the handshake on the acceptor side, or `1` on the requester
    /// side (the acceptor is always a singleton).
    pub fn remote_communicator_size(&self) -> Result<usize> {
        match self.require_connected()? {
            Role::Server(server) => Ok(server.remote_size),
            Role::Client(_) => Ok(1),
        }
    }

    /// No-op hook kept for parity with bulk send/receive framing in callers
    /// that bracket a batch of frames; this protocol has no packing to flush.
    pub fn start_send_package(&self, _remote_rank: usize) {}

    /// See [`start_send_package`](Self::start_send_package).
    pub fn finish_send_package(&self) {}

    /// See [`start_send_package`](Self::start_send_package).
    pub fn start_receive_package(&self, _remote_rank: RankSelector) {}

    /// See [`start_send_package`](Self::start_send_package).
    pub fn finish_receive_package(&self) {}

    /// Shuts down both socket directions, stops the background scheduler,
    /// and joins its worker. Idempotent calls after the first return a
    /// precondition error, matching every other operation on a closed
    /// communicator.
    pub fn close_connection(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(Error::Precondition("communicator is not connected".into()));
        }
        match self.role.get() {
            Some(Role::Server(server)) => {
                for endpoint in &server.endpoints {
                    shutdown_endpoint(&server.handle, endpoint);
                }
                if let Some(runtime) = server.runtime.lock().take() {
                    runtime.shutdown_timeout(SHUTDOWN_GRACE);
                }
            }
            Some(Role::Client(client)) => {
                shutdown_endpoint(&client.handle, &client.endpoint);
                if let Some(runtime) = client.runtime.lock().take() {
                    runtime.shutdown_timeout(SHUTDOWN_GRACE);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<&Role> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::Precondition("communicator is not connected".into()));
        }
        self.role.get().ok_or_else(|| Error::Precondition("communicator has not completed a handshake".into()))
    }

    fn resolve_send_target(role: &Role, remote_rank: usize) -> Result<(Handle, Arc<tokio::sync::Mutex<OwnedWriteHalf>>, Option<i32>)> {
        match role {
            Role::Server(server) => {
                let endpoint = server.endpoints.get(remote_rank).ok_or_else(|| {
                    Error::Precondition(format!("remote rank {remote_rank} out of range [0, {})", server.remote_size))
                })?;
                Ok((server.handle.clone(), endpoint.writer.clone(), None))
            }
            Role::Client(client) => {
                if remote_rank != 0 {
                    return Err(Error::Precondition(format!(
                        "requester communicator may only address acceptor rank 0, got {remote_rank}"
                    )));
                }
                Ok((client.handle.clone(), client.endpoint.writer.clone(), Some(client.own_rank as i32)))
            }
        }
    }

    fn resolve_receive_target(
        role: &Role,
        desired_rank: RankSelector,
    ) -> Result<(Handle, usize, Arc<tokio::sync::Mutex<OwnedReadHalf>>, Option<usize>)> {
        match role {
            Role::Client(client) => {
                let rank = match desired_rank {
                    RankSelector::AnySender => {
                        return Err(Error::Precondition("requester communicator cannot receive from ANY_SENDER".into()))
                    }
                    RankSelector::Rank(rank) => rank,
                };
                if rank != 0 {
                    return Err(Error::Precondition(format!(
                        "requester communicator may only address acceptor rank 0, got {rank}"
                    )));
                }
                Ok((client.handle.clone(), 0, client.endpoint.reader.clone(), None))
            }
            Role::Server(server) => {
                let handle = server.handle.clone();
                let rank = handle.block_on(server.channel.take(desired_rank));
                let reader = server.endpoints[rank].reader.clone();
                Ok((handle, rank, reader, Some(rank)))
            }
        }
    }

    fn rearm(role: &Role, rearm_idx: Option<usize>) {
        if let (Role::Server(server), Some(idx)) = (role, rearm_idx) {
            let _ = server.rearm[idx].send(());
        }
    }

    pub fn send_bool(&self, value: bool, remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_bool(&mut guard, value).await
        })?;
        Ok(())
    }

    pub fn receive_bool(&self, desired_rank: RankSelector) -> Result<(bool, usize)> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        let value = handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_bool(&mut guard).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok((value, rank))
    }

    pub fn send_int(&self, value: i32, remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_i32(&mut guard, value).await
        })?;
        Ok(())
    }

    pub fn receive_int(&self, desired_rank: RankSelector) -> Result<(i32, usize)> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        let value = handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_i32(&mut guard).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok((value, rank))
    }

    pub fn send_double(&self, value: f64, remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_f64(&mut guard, value).await
        })?;
        Ok(())
    }

    pub fn receive_double(&self, desired_rank: RankSelector) -> Result<(f64, usize)> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        let value = handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_f64(&mut guard).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok((value, rank))
    }

    pub fn send_int_slice(&self, values: &[i32], remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_i32_slice(&mut guard, values).await
        })?;
        Ok(())
    }

    /// Fills `out` completely; its length is the out-of-band element count
    /// both sides already agree on.
    pub fn receive_int_slice(&self, out: &mut [i32], desired_rank: RankSelector) -> Result<usize> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_i32_slice(&mut guard, out).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok(rank)
    }

    pub fn send_double_slice(&self, values: &[f64], remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_f64_slice(&mut guard, values).await
        })?;
        Ok(())
    }

    pub fn receive_double_slice(&self, out: &mut [f64], desired_rank: RankSelector) -> Result<usize> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_f64_slice(&mut guard, out).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok(rank)
    }

    pub fn send_string(&self, value: &str, remote_rank: usize) -> Result<()> {
        let role = self.require_connected()?;
        let (handle, stream, own_rank) = Self::resolve_send_target(role, remote_rank)?;
        handle.block_on(async move {
            let mut guard = stream.lock().await;
            if let Some(rank) = own_rank {
                codec::write_i32(&mut guard, rank).await?;
            }
            codec::write_string(&mut guard, value).await
        })?;
        Ok(())
    }

    pub fn receive_string(&self, desired_rank: RankSelector) -> Result<(String, usize)> {
        let role = self.require_connected()?;
        let (handle, rank, stream, rearm_idx) = Self::resolve_receive_target(role, desired_rank)?;
        let value = handle.block_on(async move {
            let mut guard = stream.lock().await;
            codec::read_string(&mut guard).await
        })?;
        Self::rearm(role, rearm_idx);
        Ok((value, rank))
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if self.connected.load(Ordering::SeqCst) {
            let _ = self.close_connection();
        }
    }
}

/// Shuts down both directions of the socket at once. Either half's file
/// descriptor refers to the same underlying socket, so reaching `Shutdown::
/// Both` through the write half also unblocks the query task's pending
/// read on the other half with an EOF.
fn shutdown_endpoint(handle: &Handle, endpoint: &Endpoint) {
    let writer = endpoint.writer.clone();
    handle.block_on(async move {
        let guard = writer.lock().await;
        if let Err(err) = socket2::SockRef::from(&*guard).shutdown(std::net::Shutdown::Both) {
            tracing::debug!(%err, "socket shutdown failed, likely already closed by the peer");
        }
    });
}
