//! A single established socket, shared between the public API and the
//! background query-announcement task that watches it.

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One peer connection, split into independent read/write halves so a
/// pending read (the query task waiting on the next announcement) never
/// blocks a concurrent write. A single shared stream mutex would make the
/// two directions mutually exclusive, which this protocol's server-to-
/// client traffic cannot tolerate: the query task can sit in `read_exact`
/// for the entire connection lifetime between announcements.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) reader: Arc<Mutex<OwnedReadHalf>>,
    pub(crate) writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Endpoint {
    pub(crate) fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self { reader: Arc::new(Mutex::new(reader)), writer: Arc::new(Mutex::new(writer)) }
    }
}
