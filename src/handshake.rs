//! Connection establishment for both communicator roles.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::codec;
use crate::config::Config;
use crate::connection::Endpoint;
use crate::error::{Error, Result};
use crate::query::QueryChannel;

/// Rearm plumbing for one accepted endpoint, handed back to the caller so
/// it can spawn the matching query-announcement task.
pub(crate) struct Accepted {
    pub(crate) remote_size: usize,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) channel: Arc<QueryChannel>,
    pub(crate) rearm_tx: Vec<mpsc::UnboundedSender<()>>,
    pub(crate) rearm_rx: Vec<Option<mpsc::UnboundedReceiver<()>>>,
}

/// Listens on `config.port` and accepts exactly `remote_size` connections,
/// where `remote_size` is reported by the first peer to connect. Every
/// subsequent peer must report the same size and a distinct rank.
pub(crate) async fn accept(config: &Config) -> Result<Accepted> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| Error::Handshake(format!("failed to bind acceptor port {}: {err}", config.port)))?;
    tracing::debug!(port = config.port, acceptor = %config.acceptor_name, "listening for coupling requester");

    let (mut first_stream, first_peer) = listener.accept().await?;
    let first_rank = codec::read_i32(&mut first_stream).await? as i64;
    let remote_size = codec::read_i32(&mut first_stream).await?;
    if remote_size <= 0 {
        return Err(Error::Handshake(format!("requester communicator size must be positive, got {remote_size}")));
    }
    let remote_size = remote_size as usize;
    if first_rank < 0 || first_rank as usize >= remote_size {
        return Err(Error::Handshake(format!("rank {first_rank} out of bounds for size {remote_size}")));
    }

    let mut slots: Vec<Option<TcpStream>> = (0..remote_size).map(|_| None).collect();
    codec::write_i32(&mut first_stream, 0).await?;
    codec::write_i32(&mut first_stream, 1).await?;
    tracing::debug!(rank = first_rank, remote_size, peer = %first_peer, "registered coupling requester");
    slots[first_rank as usize] = Some(first_stream);

    for _ in 1..remote_size {
        let (mut stream, peer) = listener.accept().await?;
        let rank = codec::read_i32(&mut stream).await?;
        let reported_size = codec::read_i32(&mut stream).await?;
        if reported_size as usize != remote_size {
            return Err(Error::Handshake(format!(
                "inconsistent requester communicator size: first peer reported {remote_size}, {peer} reported {reported_size}"
            )));
        }
        if rank < 0 || rank as usize >= remote_size || slots[rank as usize].is_some() {
            return Err(Error::Handshake(format!("duplicate or out-of-range rank {rank} from {peer}")));
        }
        codec::write_i32(&mut stream, 0).await?;
        codec::write_i32(&mut stream, 1).await?;
        tracing::debug!(rank, remote_size, %peer, "registered coupling requester");
        slots[rank as usize] = Some(stream);
    }

    let mut endpoints = Vec::with_capacity(remote_size);
    let mut rearm_tx = Vec::with_capacity(remote_size);
    let mut rearm_rx = Vec::with_capacity(remote_size);
    for slot in slots {
        let stream = slot.expect("every rank slot is populated once the handshake loop completes");
        endpoints.push(Endpoint::new(stream));
        let (tx, rx) = mpsc::unbounded_channel();
        rearm_tx.push(tx);
        rearm_rx.push(Some(rx));
    }

    Ok(Accepted {
        remote_size,
        endpoints,
        channel: Arc::new(QueryChannel::new()),
        rearm_tx,
        rearm_rx,
    })
}

/// Dials the acceptor at `127.0.0.1:config.port`, retrying until it
/// answers or `config.connect_attempt_limit` is exhausted, then exchanges
/// rank/size and confirms the acceptor is a singleton communicator.
pub(crate) async fn connect(config: &Config) -> Result<(Endpoint, usize)> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
    let mut attempt = 0usize;
    let mut stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(err) => {
                attempt += 1;
                if attempt >= config.connect_attempt_limit {
                    return Err(Error::Handshake(format!(
                        "could not reach acceptor {} at {addr} after {attempt} attempts: {err}",
                        config.acceptor_name
                    )));
                }
                tracing::debug!(attempt, %err, "acceptor not yet reachable, retrying");
                tokio::time::sleep(crate::config::CONNECT_RETRY_INTERVAL).await;
            }
        }
    };

    codec::write_i32(&mut stream, config.local_rank as i32).await?;
    codec::write_i32(&mut stream, config.local_size as i32).await?;
    let remote_rank = codec::read_i32(&mut stream).await?;
    let remote_size = codec::read_i32(&mut stream).await?;
    if remote_rank != 0 {
        return Err(Error::Handshake(format!("acceptor reported non-zero base rank {remote_rank}")));
    }
    if remote_size != 1 {
        return Err(Error::Handshake(format!("acceptor communicator size must be 1, got {remote_size}")));
    }
    tracing::debug!(port = config.port, requester = %config.requester_name, "connected to coupling acceptor");
    Ok((Endpoint::new(stream), config.local_rank))
}
