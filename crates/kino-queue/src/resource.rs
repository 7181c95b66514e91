//! Resources
//!
//! A [`Resource`] describes how a playable URL becomes a [`NativeItem`]:
//!
//! - `Simple`: the engine loads the URL directly
//! - `Custom`: loading is delegated to a [`ResourceLoaderDelegate`], called on
//!   a serial queue shared by every custom resource
//! - `Encrypted`: content keys are obtained through the shared
//!   [`ContentKeySession`]
//!
//! The `loading` and `failing` sentinels are custom resources pointed at
//! reserved URLs. Their delegates never touch the network: they mark the item
//! as loading, or fail it with a given error, so that synthetic states flow
//! through the same channels as real playback.

use crate::{
    attributes::ItemAttributes,
    config::PlayerConfig,
    content_key::{ContentKeySession, ContentKeySessionDelegate},
    engine::{ItemSource, NativeItem, WeakNativeItem},
    error::ItemError,
};
use std::sync::{Arc, LazyLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use url::Url;

/// Reserved URL of the loading sentinel
pub const LOADING_URL: &str = "kino://loading.m3u8";

/// Reserved URL of the failing sentinel
pub const FAILING_URL: &str = "kino://failing.m3u8";

// Parsed once. Both constants are valid absolute URLs, checked by
// `test_sentinel_urls_parse`.
static LOADING_SENTINEL: LazyLock<Url> =
    LazyLock::new(|| Url::parse(LOADING_URL).expect("loading sentinel URL is valid"));
static FAILING_SENTINEL: LazyLock<Url> =
    LazyLock::new(|| Url::parse(FAILING_URL).expect("failing sentinel URL is valid"));

type Job = Box<dyn FnOnce() + Send>;

/// Serial execution context.
///
/// Jobs run one at a time, in dispatch order, on a dedicated task. Clones
/// share the same context.
#[derive(Clone)]
pub struct SerialQueue {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Create a queue. Must be called within a Tokio runtime.
    pub fn new(label: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let name = label.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!(queue = %name, "Serial queue closed");
        });
        Self {
            label: label.into(),
            tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueue a job
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            warn!(queue = %self.label, "Job dispatched to a closed serial queue");
        }
    }

    /// Wait until every job dispatched so far has run
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.label).finish()
    }
}

/// Request to load the data of a resource-loaded item
pub struct LoadingRequest {
    url: Url,
    item: WeakNativeItem,
}

impl LoadingRequest {
    pub(crate) fn new(item: &NativeItem) -> Self {
        Self {
            url: item.url().clone(),
            item: item.downgrade(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The item was released, nobody waits for the result anymore
    pub fn is_cancelled(&self) -> bool {
        self.item.upgrade().is_none()
    }

    /// Report that loading is in progress
    pub fn signal_loading(&self) {
        if let Some(item) = self.item.upgrade() {
            item.mark_loading();
        }
    }

    /// Report that the requested data was provided
    pub fn finish_loading(self) {
        if let Some(item) = self.item.upgrade() {
            item.mark_ready();
        }
    }

    /// Fail the request, the error lands in the item error slot
    pub fn finish_loading_with_error(self, error: ItemError) {
        if let Some(item) = self.item.upgrade() {
            item.fail(error);
        }
    }
}

impl std::fmt::Debug for LoadingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingRequest")
            .field("url", &self.url.as_str())
            .finish()
    }
}

/// Resource loading delegation protocol
pub trait ResourceLoaderDelegate: Send + Sync + 'static {
    /// Return `true` to take ownership of the request and resolve it later,
    /// `false` to reject it (the item then fails).
    fn should_wait_for_loading(&self, request: LoadingRequest) -> bool;
}

/// Delegate of the loading sentinel
#[derive(Debug, Default)]
pub struct LoadingResourceLoaderDelegate;

impl ResourceLoaderDelegate for LoadingResourceLoaderDelegate {
    fn should_wait_for_loading(&self, request: LoadingRequest) -> bool {
        request.signal_loading();
        true
    }
}

/// Delegate of the failing sentinel
#[derive(Debug)]
pub struct FailedResourceLoaderDelegate {
    error: ItemError,
}

impl FailedResourceLoaderDelegate {
    pub fn new(error: ItemError) -> Self {
        Self { error }
    }
}

impl ResourceLoaderDelegate for FailedResourceLoaderDelegate {
    fn should_wait_for_loading(&self, request: LoadingRequest) -> bool {
        request.finish_loading_with_error(self.error.clone());
        true
    }
}

/// Shared state needed to materialize resources
#[derive(Clone)]
pub struct ResourceContext {
    pub(crate) attributes: Arc<ItemAttributes>,
    pub(crate) loader_queue: SerialQueue,
    pub(crate) key_session: Arc<ContentKeySession>,
}

impl ResourceContext {
    /// Create a context. Must be called within a Tokio runtime.
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            attributes: ItemAttributes::new(),
            loader_queue: SerialQueue::new("kino.resource_loader"),
            key_session: Arc::new(ContentKeySession::new(config.content_key_delivery)),
        }
    }

    pub fn attributes(&self) -> &Arc<ItemAttributes> {
        &self.attributes
    }

    pub fn loader_queue(&self) -> &SerialQueue {
        &self.loader_queue
    }

    pub fn key_session(&self) -> &Arc<ContentKeySession> {
        &self.key_session
    }
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("attributes", &self.attributes)
            .field("loader_queue", &self.loader_queue)
            .finish()
    }
}

/// How a playable URL is turned into a native item
#[derive(Clone)]
pub enum Resource {
    Simple {
        url: Url,
    },
    Custom {
        url: Url,
        delegate: Arc<dyn ResourceLoaderDelegate>,
    },
    Encrypted {
        url: Url,
        delegate: Arc<dyn ContentKeySessionDelegate>,
    },
}

impl Resource {
    pub fn simple(url: Url) -> Self {
        Resource::Simple { url }
    }

    pub fn custom(url: Url, delegate: Arc<dyn ResourceLoaderDelegate>) -> Self {
        Resource::Custom { url, delegate }
    }

    pub fn encrypted(url: Url, delegate: Arc<dyn ContentKeySessionDelegate>) -> Self {
        Resource::Encrypted { url, delegate }
    }

    /// Resource which stays in the loading state
    pub fn loading() -> Self {
        Resource::custom(
            LOADING_SENTINEL.clone(),
            Arc::new(LoadingResourceLoaderDelegate),
        )
    }

    /// Resource which fails with `error` as soon as it loads
    pub fn failing(error: ItemError) -> Self {
        Resource::custom(
            FAILING_SENTINEL.clone(),
            Arc::new(FailedResourceLoaderDelegate::new(error)),
        )
    }

    pub fn url(&self) -> &Url {
        match self {
            Resource::Simple { url }
            | Resource::Custom { url, .. }
            | Resource::Encrypted { url, .. } => url,
        }
    }

    /// Whether this is the loading sentinel
    pub fn is_loading(&self) -> bool {
        matches!(self, Resource::Custom { url, .. } if url.as_str() == LOADING_URL)
    }

    /// Build a fresh native item
    pub fn materialize(&self, context: &ResourceContext) -> NativeItem {
        let attributes = context.attributes.clone();
        match self {
            Resource::Simple { url } => NativeItem::new(url.clone(), ItemSource::Direct, attributes),
            Resource::Custom { url, delegate } => NativeItem::new(
                url.clone(),
                ItemSource::ResourceLoaded {
                    delegate: delegate.clone(),
                    queue: context.loader_queue.clone(),
                },
                attributes,
            ),
            Resource::Encrypted { url, delegate } => {
                let item =
                    NativeItem::new(url.clone(), ItemSource::KeyProtected, attributes.clone());
                match context.key_session.process(&item, delegate.clone()) {
                    Ok(()) => item,
                    Err(e) => {
                        error!(url = %url, error = %e, "Playing without key session");
                        NativeItem::new(url.clone(), ItemSource::Direct, attributes)
                    }
                }
            }
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Resource::Simple { url: lhs }, Resource::Simple { url: rhs }) => lhs == rhs,
            (
                Resource::Custom { url: lhs, delegate: lhs_delegate },
                Resource::Custom { url: rhs, delegate: rhs_delegate },
            ) => lhs == rhs && std::ptr::addr_eq(Arc::as_ptr(lhs_delegate), Arc::as_ptr(rhs_delegate)),
            (
                Resource::Encrypted { url: lhs, delegate: lhs_delegate },
                Resource::Encrypted { url: rhs, delegate: rhs_delegate },
            ) => lhs == rhs && std::ptr::addr_eq(Arc::as_ptr(lhs_delegate), Arc::as_ptr(rhs_delegate)),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Simple { url } => f.debug_struct("Simple").field("url", &url.as_str()).finish(),
            Resource::Custom { url, .. } => f.debug_struct("Custom").field("url", &url.as_str()).finish(),
            Resource::Encrypted { url, .. } => {
                f.debug_struct("Encrypted").field("url", &url.as_str()).finish()
            }
        }
    }
}
