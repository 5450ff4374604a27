//! L2CAP channels

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::io::DuplexStream;
use uuid::Uuid;

use crate::sync::lock;

/// Protocol/service multiplexer identifying a channel
pub type Psm = u16;

/// Byte stream of an open channel, handed out at most once.
///
/// Channel values are cloned into every bus subscriber, so the stream sits
/// behind a shared slot that the first consumer empties.
#[derive(Clone, Default)]
pub struct ChannelIo {
    stream: Arc<Mutex<Option<DuplexStream>>>,
}

impl ChannelIo {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Take ownership of the stream; later calls return `None`
    pub fn take(&self) -> Option<DuplexStream> {
        lock(&self.stream).take()
    }

    pub fn is_taken(&self) -> bool {
        lock(&self.stream).is_none()
    }
}

impl fmt::Debug for ChannelIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelIo")
            .field("taken", &self.is_taken())
            .finish()
    }
}

/// An open L2CAP channel to a peer
#[derive(Debug, Clone)]
pub struct L2capChannel {
    /// Identifier of the remote peer
    pub peer: Uuid,
    pub psm: Psm,
    pub io: ChannelIo,
}

impl L2capChannel {
    pub fn new(peer: Uuid, psm: Psm, io: ChannelIo) -> Self {
        Self { peer, psm, io }
    }
}

impl PartialEq for L2capChannel {
    fn eq(&self, other: &Self) -> bool {
        self.peer == other.peer && self.psm == other.psm
    }
}
