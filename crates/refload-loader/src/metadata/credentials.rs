//! Credential handling for metadata reads
//!
//! Each provider has a primary client (ambient credentials) and optionally an
//! elevated credential source. Client handles are immutable; a refresh builds
//! a new handle from the source and swaps it in under a lock.

use super::ObjectHeadClient;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shared handle to a connected provider client.
pub type ClientHandle = Arc<dyn ObjectHeadClient>;

/// Something that can build an authorized provider client on demand.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short description for log lines; never includes secrets.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<ClientHandle>;
}

enum ElevatedHandle {
    NotConnected,
    Connected(ClientHandle),
    /// Connecting failed; only an explicit refresh tries again
    Unavailable,
}

struct Elevated {
    source: Arc<dyn CredentialSource>,
    handle: Mutex<ElevatedHandle>,
}

/// Primary client plus an optional refreshable elevated client.
pub struct CredentialSet {
    primary: ClientHandle,
    elevated: Option<Elevated>,
}

impl CredentialSet {
    pub fn new(primary: ClientHandle) -> Self {
        Self {
            primary,
            elevated: None,
        }
    }

    pub fn with_elevated(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.elevated = Some(Elevated {
            source,
            handle: Mutex::new(ElevatedHandle::NotConnected),
        });
        self
    }

    pub fn has_elevated(&self) -> bool {
        self.elevated.is_some()
    }

    /// The client to use for the next request.
    ///
    /// The elevated client is connected lazily, once. If that connect fails
    /// the primary client is used until a successful [`refresh`](Self::refresh).
    pub async fn current(&self) -> ClientHandle {
        let Some(elevated) = &self.elevated else {
            return Arc::clone(&self.primary);
        };

        let mut handle = elevated.handle.lock().await;
        match &*handle {
            ElevatedHandle::Connected(client) => return Arc::clone(client),
            ElevatedHandle::Unavailable => return Arc::clone(&self.primary),
            ElevatedHandle::NotConnected => {},
        }

        match elevated.source.connect().await {
            Ok(client) => {
                info!(source = %elevated.source.describe(), "Connected elevated metadata credentials");
                *handle = ElevatedHandle::Connected(Arc::clone(&client));
                client
            },
            Err(e) => {
                warn!(
                    source = %elevated.source.describe(),
                    error = %e,
                    "Could not connect elevated metadata credentials, using default credentials"
                );
                *handle = ElevatedHandle::Unavailable;
                Arc::clone(&self.primary)
            },
        }
    }

    /// Rebuild the elevated client and return the new handle.
    ///
    /// Returns `None` when no elevated source is configured or the rebuild
    /// failed; the previous handle is kept in the latter case.
    pub async fn refresh(&self) -> Option<ClientHandle> {
        let elevated = self.elevated.as_ref()?;
        let mut handle = elevated.handle.lock().await;

        match elevated.source.connect().await {
            Ok(client) => {
                info!(source = %elevated.source.describe(), "Refreshed elevated metadata credentials");
                *handle = ElevatedHandle::Connected(Arc::clone(&client));
                Some(client)
            },
            Err(e) => {
                warn!(
                    source = %elevated.source.describe(),
                    error = %e,
                    "Failed to refresh elevated metadata credentials"
                );
                None
            },
        }
    }
}
