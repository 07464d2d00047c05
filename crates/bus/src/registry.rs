//! Connection registry
//!
//! At most one live connection per identity. Concurrent callers for an
//! unseen identity share a per-identity `OnceCell`: the first connect wins
//! and everyone else awaits the same handle. A failed connect leaves the cell
//! empty so the next caller retries. A connect that finishes after its
//! identity was closed is closed again and reported as `NotConnected`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{BusError, BusMessage, Identity, MessageBus, Subscription, TransferError};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, trace};

struct HandleInner<C> {
    identity: Identity,
    connection: C,
    open_sessions: AtomicUsize,
    closed: AtomicBool,
}

/// Shared handle to one identity's connection
///
/// Clones share the same instance.
pub struct ConnectionHandle<C> {
    inner: Arc<HandleInner<C>>,
}

impl<C> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identity", &self.inner.identity)
            .field("open_sessions", &self.open_sessions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C> ConnectionHandle<C> {
    fn new(identity: Identity, connection: C) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                identity,
                connection,
                open_sessions: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// The live connection
    ///
    /// # Errors
    /// `NotConnected` once the handle was closed through the registry
    pub fn connection(&self) -> Result<&C, TransferError> {
        if self.is_closed() {
            return Err(TransferError::not_connected(self.inner.identity.as_str()));
        }
        Ok(&self.inner.connection)
    }

    fn live(&self) -> Result<&C, BusError> {
        if self.is_closed() {
            return Err(BusError::NotConnected {
                identity: self.inner.identity.as_str().to_string(),
            });
        }
        Ok(&self.inner.connection)
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Same underlying instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mark closed and close the connection once; false when already closed
    async fn shutdown(&self) -> bool
    where
        C: MessageBus,
    {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.connection.close().await;
        true
    }

    /// Count a running session until the lease is dropped
    ///
    /// # Errors
    /// `NotConnected` on a closed handle
    pub fn lease(&self) -> Result<SessionLease<C>, TransferError> {
        self.connection()?;
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionLease {
            handle: self.clone(),
        })
    }
}

/// Sessions act through the handle so a registry close reaches them
///
/// Every call after `ConnectionRegistry::close` fails with
/// `BusError::NotConnected`. `close` on a handle leaves the shared connection
/// alone; the registry owns its lifecycle.
impl<C: MessageBus + Sync> MessageBus for ConnectionHandle<C> {
    fn endpoint(&self) -> &str {
        self.inner.connection.endpoint()
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        self.live()?.request(subject, payload, timeout).await
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        self.live()?.publish(message).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.live()?.subscribe(subject).await
    }

    async fn close(&self) {
        trace!(identity = %self.inner.identity, "handle released");
    }
}

/// Guard counting one open session on a handle
pub struct SessionLease<C> {
    handle: ConnectionHandle<C>,
}

impl<C> SessionLease<C> {
    pub fn handle(&self) -> &ConnectionHandle<C> {
        &self.handle
    }
}

impl<C> Drop for SessionLease<C> {
    fn drop(&mut self) {
        self.handle.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

type Slot<C> = Arc<OnceCell<ConnectionHandle<C>>>;

/// Identity-keyed connection registry
///
/// An explicit object: callers create one and pass it where needed.
pub struct ConnectionRegistry<C> {
    slots: Mutex<HashMap<Identity, Slot<C>>>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ConnectionRegistry<C>
where
    C: MessageBus + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Identity, Slot<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing handle or a new one from `connect`
    ///
    /// # Errors
    /// Whatever `connect` returns; the slot stays empty for a retry
    #[instrument(name = "registry_get_or_create", skip(self, connect), fields(identity = %identity))]
    pub async fn get_or_create<F, Fut>(
        &self,
        identity: &Identity,
        connect: F,
    ) -> Result<ConnectionHandle<C>, TransferError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, TransferError>>,
    {
        let slot = self
            .slots()
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let handle = slot
            .get_or_try_init(|| async {
                let connection = connect().await?;
                info!(identity = %identity, endpoint = connection.endpoint(), "connected");
                Ok::<_, TransferError>(ConnectionHandle::new(identity.clone(), connection))
            })
            .await?
            .clone();

        // a close that ran while connecting removed the slot; never hand out
        // a connection the map no longer tracks
        let current = self
            .slots()
            .get(identity)
            .is_some_and(|registered| Arc::ptr_eq(registered, &slot));
        if !current {
            if handle.shutdown().await {
                debug!(identity = %identity, "connection closed while connecting, discarded");
            }
            return Err(TransferError::not_connected(identity.as_str()));
        }
        Ok(handle)
    }

    /// Live handle for `identity`
    ///
    /// # Errors
    /// `NotConnected` for an unknown, closed or still-connecting identity
    pub fn get(&self, identity: &Identity) -> Result<ConnectionHandle<C>, TransferError> {
        self.slots()
            .get(identity)
            .and_then(|slot| slot.get().cloned())
            .filter(|handle| !handle.is_closed())
            .ok_or_else(|| TransferError::not_connected(identity.as_str()))
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.get(identity).is_ok()
    }

    /// Drain and close the connection, then forget the identity
    ///
    /// Closing an unknown identity is a no-op.
    #[instrument(name = "registry_close", skip(self), fields(identity = %identity))]
    pub async fn close(&self, identity: &Identity) {
        let slot = self.slots().remove(identity);
        let Some(handle) = slot.and_then(|slot| slot.get().cloned()) else {
            return;
        };
        handle.shutdown().await;
        debug!(
            identity = %identity,
            open_sessions = handle.open_sessions(),
            "connection closed"
        );
    }

    /// Close every registered connection
    pub async fn close_all(&self) {
        let identities: Vec<Identity> = self.slots().keys().cloned().collect();
        for identity in identities {
            self.close(&identity).await;
        }
    }
}
