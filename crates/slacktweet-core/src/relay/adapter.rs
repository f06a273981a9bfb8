use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::{
    errors::Error,
    relay::{
        port::{StreamHandle, StreamListener, StreamTransport},
        types::{is_rate_limit, StreamItem},
    },
    Result,
};

/// Callback that receives every non-repost item. Returning `false` stops the stream.
pub type StreamHandler = Arc<dyn Fn(&StreamItem) -> bool + Send + Sync>;

struct Subscription {
    generation: u64,
    track_terms: Vec<String>,
    handle: StreamHandle,
}

/// Owns the (single) upstream filtered subscription.
///
/// Filter changes recreate the subscription: the upstream has no incremental
/// update, so the old stream is disconnected before the new one is opened.
pub struct StreamRelay {
    transport: Arc<dyn StreamTransport>,
    // Serializes open/close so concurrent filter edits cannot race.
    ops: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<Subscription>>,
    handler: Mutex<Option<StreamHandler>>,
    next_generation: AtomicU64,
}

impl StreamRelay {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            ops: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            handler: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Replace the handler unconditionally (last registration wins).
    pub fn register_stream_handler(&self, handler: StreamHandler) {
        tracing::info!("registering new stream handler");
        *lock(&self.handler) = Some(handler);
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription)
            .as_ref()
            .is_some_and(|s| s.handle.is_live())
    }

    /// Terms of the live subscription (empty when none).
    pub fn track_terms(&self) -> Vec<String> {
        lock(&self.subscription)
            .as_ref()
            .filter(|s| s.handle.is_live())
            .map(|s| s.track_terms.clone())
            .unwrap_or_default()
    }

    /// Open a subscription for `filters` unless one is already live for the
    /// same terms. Returns `true` when a new stream was opened.
    pub async fn create_filtered_stream(self: &Arc<Self>, filters: &[String]) -> Result<bool> {
        let _op = self.ops.lock().await;
        if filters.is_empty() {
            tracing::debug!("no filters; not opening a stream");
            return Ok(false);
        }
        {
            let sub = lock(&self.subscription);
            if let Some(s) = sub.as_ref() {
                if s.handle.is_live() && s.track_terms == filters {
                    tracing::debug!("stream already live for these terms");
                    return Ok(false);
                }
            }
        }
        self.teardown();
        self.open(filters).await?;
        Ok(true)
    }

    /// Tear down the live subscription and open one for `filters`.
    ///
    /// An empty filter set leaves the relay with no subscription.
    pub async fn replace_filters(self: &Arc<Self>, filters: &[String]) -> Result<()> {
        let _op = self.ops.lock().await;
        self.teardown();
        if filters.is_empty() {
            tracing::info!("filter set empty; relay idle");
            return Ok(());
        }
        self.open(filters).await
    }

    /// Disconnect the live subscription, if any.
    pub async fn disconnect(&self) {
        let _op = self.ops.lock().await;
        self.teardown();
    }

    async fn open(self: &Arc<Self>, filters: &[String]) -> Result<()> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let listener = Arc::new(SubscriptionListener {
            relay: Arc::clone(self),
            generation,
        });
        let handle = self
            .transport
            .open_filtered_stream(filters, listener)
            .await?;
        tracing::info!(terms = ?filters, "filtered stream opened");
        *lock(&self.subscription) = Some(Subscription {
            generation,
            track_terms: filters.to_vec(),
            handle,
        });
        Ok(())
    }

    fn teardown(&self) {
        if let Some(sub) = lock(&self.subscription).take() {
            sub.handle.disconnect();
            tracing::info!(terms = ?sub.track_terms, "filtered stream closed");
        }
    }

    fn teardown_generation(&self, generation: Option<u64>) {
        let mut sub = lock(&self.subscription);
        let matches = match (sub.as_ref(), generation) {
            (Some(_), None) => true,
            (Some(s), Some(g)) => s.generation == g,
            (None, _) => false,
        };
        if matches {
            if let Some(s) = sub.take() {
                s.handle.disconnect();
            }
        }
    }

    fn handle_error(&self, status_code: u16, generation: Option<u64>) -> bool {
        if is_rate_limit(status_code) {
            let err = Error::UpstreamRateLimited(status_code);
            tracing::warn!(category = err.category(), "{err}; tearing down stream");
            self.teardown_generation(generation);
            return false;
        }
        tracing::warn!(status_code, "upstream stream error");
        true
    }
}

impl StreamListener for StreamRelay {
    fn on_status(&self, item: &StreamItem) -> bool {
        if item.is_repost {
            tracing::debug!(id = %item.id, "suppressing repost");
            return true;
        }
        let handler = lock(&self.handler).clone();
        match handler {
            Some(h) => h(item),
            None => true,
        }
    }

    fn on_error(&self, status_code: u16) -> bool {
        self.handle_error(status_code, None)
    }
}

/// Listener bound to one subscription, so late callbacks from a stream that
/// was already replaced cannot tear down its successor.
struct SubscriptionListener {
    relay: Arc<StreamRelay>,
    generation: u64,
}

impl StreamListener for SubscriptionListener {
    fn on_status(&self, item: &StreamItem) -> bool {
        self.relay.on_status(item)
    }

    fn on_error(&self, status_code: u16) -> bool {
        self.relay.handle_error(status_code, Some(self.generation))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeTransport {
        opened: Mutex<Vec<Vec<String>>>,
        tokens: Mutex<Vec<CancellationToken>>,
        listener: Mutex<Option<Arc<dyn StreamListener>>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FakeTransport {
        fn opens(&self) -> Vec<Vec<String>> {
            self.opened.lock().unwrap().clone()
        }

        fn cancelled(&self) -> usize {
            self.tokens
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.is_cancelled())
                .count()
        }

        fn listener(&self) -> Arc<dyn StreamListener> {
            self.listener.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl StreamTransport for FakeTransport {
        async fn open_filtered_stream(
            &self,
            terms: &[String],
            listener: Arc<dyn StreamListener>,
        ) -> Result<StreamHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::External("refused".into()));
            }
            self.opened.lock().unwrap().push(terms.to_vec());
            *self.listener.lock().unwrap() = Some(listener);
            let token = CancellationToken::new();
            self.tokens.lock().unwrap().push(token.clone());
            Ok(StreamHandle::detached(token))
        }
    }

    fn terms(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn item(id: &str, repost: bool) -> StreamItem {
        StreamItem {
            id: id.into(),
            text: format!("text {id}"),
            author: Some("someone".into()),
            is_repost: repost,
        }
    }

    #[tokio::test]
    async fn create_is_noop_when_live_with_same_terms() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));

        assert!(relay.create_filtered_stream(&terms(&["rust"])).await.unwrap());
        assert!(!relay.create_filtered_stream(&terms(&["rust"])).await.unwrap());

        assert_eq!(transport.opens().len(), 1);
        assert!(relay.is_subscribed());
        assert_eq!(relay.track_terms(), terms(&["rust"]));
    }

    #[tokio::test]
    async fn create_with_new_terms_recreates_subscription() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));

        relay.create_filtered_stream(&terms(&["rust"])).await.unwrap();
        relay
            .create_filtered_stream(&terms(&["rust", "go"]))
            .await
            .unwrap();

        assert_eq!(
            transport.opens(),
            vec![terms(&["rust"]), terms(&["rust", "go"])]
        );
        assert_eq!(transport.cancelled(), 1);
        assert_eq!(relay.track_terms(), terms(&["rust", "go"]));
    }

    #[tokio::test]
    async fn empty_filters_never_open() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));

        assert!(!relay.create_filtered_stream(&[]).await.unwrap());
        assert!(transport.opens().is_empty());
        assert!(!relay.is_subscribed());
    }

    #[tokio::test]
    async fn replace_with_empty_tears_down() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));

        relay.replace_filters(&terms(&["a", "b"])).await.unwrap();
        assert!(relay.is_subscribed());

        relay.replace_filters(&[]).await.unwrap();
        assert!(!relay.is_subscribed());
        assert!(relay.track_terms().is_empty());
        assert_eq!(transport.cancelled(), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_no_subscription() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));
        relay.replace_filters(&terms(&["a"])).await.unwrap();

        transport.fail.store(true, Ordering::SeqCst);
        assert!(relay.replace_filters(&terms(&["b"])).await.is_err());
        assert!(!relay.is_subscribed());
    }

    #[tokio::test]
    async fn repost_never_reaches_handler() {
        let relay = Arc::new(StreamRelay::new(Arc::new(FakeTransport::default())));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        relay.register_stream_handler(Arc::new(move |_item| {
            calls2.fetch_add(1, Ordering::SeqCst);
            true
        }));

        assert!(relay.on_status(&item("1", true)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(relay.on_status(&item("2", false)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_result_is_returned_and_last_registration_wins() {
        let relay = Arc::new(StreamRelay::new(Arc::new(FakeTransport::default())));
        assert!(relay.on_status(&item("0", false)));

        relay.register_stream_handler(Arc::new(|_| true));
        relay.register_stream_handler(Arc::new(|_| false));
        assert!(!relay.on_status(&item("1", false)));
    }

    #[tokio::test]
    async fn rate_limit_tears_down_stream() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));
        relay.create_filtered_stream(&terms(&["rust"])).await.unwrap();

        assert!(!transport.listener().on_error(420));
        assert!(!relay.is_subscribed());
        assert!(relay.track_terms().is_empty());
        assert_eq!(transport.cancelled(), 1);
    }

    #[tokio::test]
    async fn other_errors_defer_to_transport() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));
        relay.create_filtered_stream(&terms(&["rust"])).await.unwrap();

        assert!(relay.on_error(503));
        assert!(relay.is_subscribed());
    }

    #[tokio::test]
    async fn stale_listener_cannot_tear_down_successor() {
        let transport = Arc::new(FakeTransport::default());
        let relay = Arc::new(StreamRelay::new(transport.clone()));

        relay.replace_filters(&terms(&["a"])).await.unwrap();
        let stale = transport.listener();
        relay.replace_filters(&terms(&["b"])).await.unwrap();

        assert!(!stale.on_error(429));
        assert!(relay.is_subscribed());
        assert_eq!(relay.track_terms(), terms(&["b"]));
    }
}
