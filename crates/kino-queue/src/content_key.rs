//! Content key session
//!
//! Encrypted resources share a single content key session. Activating an
//! encrypted item swaps the session delegate, registers the item as a key
//! recipient and issues a key request. These three steps form one critical
//! section guarded by the session lock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Content Key Session                  │
//! ├──────────────────────────────────────────────────────┤
//! │                                                      │
//! │   Resource::Encrypted ──┐                            │
//! │   Resource::Encrypted ──┼──► lock ─► set delegate    │
//! │   Resource::Encrypted ──┘          ─► add recipient  │
//! │                                    ─► issue request  │
//! │                                          │           │
//! │                               ┌──────────┴─────────┐ │
//! │                               │ serial key queue   │ │
//! │                               │ delegate callback  │ │
//! │                               └────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::engine::{NativeItem, WeakNativeItem};
use crate::error::{Error, ItemError, Result};
use crate::resource::SerialQueue;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Content key delegation protocol, analogous to license acquisition
pub trait ContentKeySessionDelegate: Send + Sync + 'static {
    /// Supply key material with [`ContentKeyRequest::process_response`], or
    /// deny it with [`ContentKeyRequest::fail`].
    fn did_provide_key_request(&self, request: ContentKeyRequest);
}

/// A pending key request for one recipient
pub struct ContentKeyRequest {
    identifier: Uuid,
    url: Url,
    item: WeakNativeItem,
}

impl ContentKeyRequest {
    fn new(item: &NativeItem) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            url: item.url().clone(),
            item: item.downgrade(),
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// URL of the protected content
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver key material
    pub fn process_response(self, key: Bytes) {
        match self.item.upgrade() {
            Some(item) => {
                debug!(request = %self.identifier, bytes = key.len(), "Content key delivered");
                item.deliver_content_key(key);
            }
            None => debug!(request = %self.identifier, "Content key recipient released"),
        }
    }

    /// Deliver base64-encoded key material, as returned by most key servers
    pub fn process_encoded_response(self, encoded: &str) -> Result<()> {
        match STANDARD.decode(encoded.trim()) {
            Ok(key) => {
                self.process_response(Bytes::from(key));
                Ok(())
            }
            Err(e) => {
                let message = format!("invalid key response: {}", e);
                self.fail(ItemError::new("content_key", -2, message.clone()));
                Err(Error::content_key(message))
            }
        }
    }

    /// Deny the request, the error lands in the item error slot
    pub fn fail(self, error: ItemError) {
        if let Some(item) = self.item.upgrade() {
            item.fail(error);
        }
    }
}

impl std::fmt::Debug for ContentKeyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKeyRequest")
            .field("identifier", &self.identifier)
            .field("url", &self.url.as_str())
            .finish()
    }
}

#[derive(Default)]
struct SessionState {
    delegate: Option<Arc<dyn ContentKeySessionDelegate>>,
    recipients: Vec<WeakNativeItem>,
    requests_issued: u64,
}

/// Content key session shared by all encrypted resources
pub struct ContentKeySession {
    available: bool,
    queue: SerialQueue,
    state: Mutex<SessionState>,
}

impl ContentKeySession {
    /// Create a session. `available` is false where hardware key delivery
    /// cannot be exercised. Must be called within a Tokio runtime.
    pub fn new(available: bool) -> Self {
        Self {
            available,
            queue: SerialQueue::new("kino.content_key_session"),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Install `delegate`, register `item` and issue a key request.
    ///
    /// The delegate receives the request on the session queue. The request
    /// is bound to the delegate installed by this call, whatever activation
    /// comes next. Fails with [`Error::ContentKeyUnavailable`] when key
    /// delivery is not available, nothing is issued then.
    pub fn process(
        &self,
        item: &NativeItem,
        delegate: Arc<dyn ContentKeySessionDelegate>,
    ) -> Result<()> {
        if !self.available {
            warn!(url = %item.url(), "Key request refused, content key delivery unavailable");
            return Err(Error::ContentKeyUnavailable);
        }

        let mut state = self.state.lock();
        state.delegate = Some(delegate.clone());
        state.recipients.retain(|recipient| recipient.upgrade().is_some());
        state.recipients.push(item.downgrade());
        state.requests_issued += 1;

        let request = ContentKeyRequest::new(item);
        debug!(
            request = %request.identifier(),
            url = %item.url(),
            "Issuing content key request"
        );
        self.queue
            .dispatch(move || delegate.did_provide_key_request(request));
        Ok(())
    }

    /// Number of key requests issued so far
    pub fn requests_issued(&self) -> u64 {
        self.state.lock().requests_issued
    }

    /// Number of live recipients
    pub fn recipient_count(&self) -> usize {
        self.state
            .lock()
            .recipients
            .iter()
            .filter(|recipient| recipient.upgrade().is_some())
            .count()
    }

    /// Whether `delegate` is the one currently installed
    pub fn has_delegate(&self, delegate: &Arc<dyn ContentKeySessionDelegate>) -> bool {
        self.state
            .lock()
            .delegate
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(delegate)))
    }

    /// Wait for pending delegate callbacks
    pub async fn flush(&self) {
        self.queue.flush().await;
    }
}

impl std::fmt::Debug for ContentKeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKeySession")
            .field("available", &self.available)
            .field("requests_issued", &self.requests_issued())
            .finish()
    }
}
