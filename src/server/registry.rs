// ! Socket registry
// !
// ! Maps server-assigned ids to live sockets and, for the HTTP transports,
// ! to the transport that later POST and poll exchanges address. A closed
// ! long-poll transport lingers after its socket is gone so the client's
// ! next poll still learns about the close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::trace;

use crate::core::error::VibeError;
use crate::server::longpoll::LongpollServerTransport;
use crate::server::stream::StreamServerTransport;
use crate::socket::Socket;
use crate::transport::traits::Frame;

/// HTTP transport addressed by follow-up exchanges
#[derive(Debug, Clone)]
pub enum HttpTransportEntry {
    Stream(Arc<StreamServerTransport>),
    LongPoll(Arc<LongpollServerTransport>),
}

impl HttpTransportEntry {
    /// Hand a POSTed frame to the socket
    pub fn deliver(&self, frame: Frame) -> bool {
        match self {
            HttpTransportEntry::Stream(transport) => transport.receive(frame),
            HttpTransportEntry::LongPoll(transport) => transport.receive(frame),
        }
    }

    /// Report a fatal exchange error and close the transport
    pub fn fail(&self, error: VibeError) {
        match self {
            HttpTransportEntry::Stream(transport) => transport.fail(error),
            HttpTransportEntry::LongPoll(transport) => transport.fail(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredSocket {
    pub socket: Socket,
    pub http: Option<HttpTransportEntry>,
}

/// Live sockets keyed by id
#[derive(Debug, Default)]
pub struct SocketRegistry {
    entries: Mutex<HashMap<String, RegisteredSocket>>,
    lingering: Mutex<HashMap<String, Arc<LongpollServerTransport>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegisteredSocket>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lingering(&self) -> MutexGuard<'_, HashMap<String, Arc<LongpollServerTransport>>> {
        self.lingering.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: impl Into<String>, entry: RegisteredSocket) {
        self.entries().insert(id.into(), entry);
    }

    pub fn remove(&self, id: &str) -> Option<RegisteredSocket> {
        self.entries().remove(id)
    }

    /// Remove a closed socket, keeping a long-poll transport reachable for `linger`
    pub fn retire(self: &Arc<Self>, id: &str, linger: Duration) -> Option<RegisteredSocket> {
        let entry = self.remove(id)?;
        let transport = match entry.http.as_ref() {
            Some(HttpTransportEntry::LongPoll(transport)) => Some(transport.clone()),
            _ => None,
        };
        let (Some(transport), Ok(runtime)) = (transport, tokio::runtime::Handle::try_current())
        else {
            return Some(entry);
        };

        self.lingering().insert(id.to_string(), transport);

        let registry: Weak<Self> = Arc::downgrade(self);
        let key = id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(linger).await;
            if let Some(registry) = registry.upgrade() {
                registry.lingering().remove(&key);
                trace!("Forgot closed long-poll transport {}", key);
            }
        });
        Some(entry)
    }

    pub fn socket(&self, id: &str) -> Option<Socket> {
        self.entries().get(id).map(|entry| entry.socket.clone())
    }

    /// HTTP transport for `id`, including a closed long-poll transport still lingering
    pub fn http(&self, id: &str) -> Option<HttpTransportEntry> {
        if let Some(entry) = self.entries().get(id) {
            return entry.http.clone();
        }
        self.lingering()
            .get(id)
            .cloned()
            .map(HttpTransportEntry::LongPoll)
    }

    /// Snapshot of every registered socket
    pub fn sockets(&self) -> Vec<Socket> {
        self.entries()
            .values()
            .map(|entry| entry.socket.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
