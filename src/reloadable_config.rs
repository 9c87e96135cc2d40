//! Refresh orchestration and derived reloadables.
//!
//! A [`ReloadableConfig`] owns an ordered list of [`ConfigSource`]s and
//! [`ConfigTransformer`]s. [`refresh`](ReloadableConfig::refresh) fetches
//! from every source (later sources win), runs the transformers, and when
//! the resulting tree differs from the current one recomputes every
//! derived [`Reloadable`] and publishes the new values.
//!
//! Concurrent refreshes are coalesced: while one is in flight every other
//! caller awaits its outcome over a `watch` channel, so the sources are
//! asked once. Derived values are all computed before anything is
//! published; a failure leaves every reloadable untouched.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::mapper::{map_bean, BeanMapper, RelaxedMapper};
use crate::query::ConfigQuery;
use crate::reloadable::{lock, NotifyOrder, Publisher, Reloadable};
use crate::sources::ConfigSource;
use crate::transformers::ConfigTransformer;
use crate::tree::ConfigTree;

pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_millis(10_000);

type Apply = Box<dyn FnOnce() + Send>;
type Derive = Arc<dyn Fn(&ConfigTree) -> Result<Apply, ConfigError> + Send + Sync>;
type Outcome = Option<Result<ConfigTree, ConfigError>>;

struct Tracked {
    id: u64,
    derive: Derive,
    close: Box<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct State {
    current: Option<ConfigTree>,
    tracked: Vec<Tracked>,
    next_id: u64,
    closed: bool,
    in_flight: Option<watch::Receiver<Outcome>>,
    dispatching: Option<ThreadId>,
    last_refreshed: Option<Instant>,
    last_error: Option<ConfigError>,
}

struct Inner {
    query: ConfigQuery,
    sources: Vec<Box<dyn ConfigSource>>,
    transformers: Vec<Box<dyn ConfigTransformer>>,
    mapper: Arc<dyn BeanMapper>,
    order: NotifyOrder,
    get_timeout: Duration,
    refresh_interval: Option<Duration>,
    state: Mutex<State>,
    // Held while publishing and while registering, so a registration
    // never misses an update.
    dispatch: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    async fn fetch(&self) -> Result<ConfigTree, ConfigError> {
        let mut merged = ConfigTree::empty();
        for source in &self.sources {
            match source.get(&self.query).await {
                Ok(tree) => merged = merged.merged_with(&tree),
                Err(e) => {
                    let err = ConfigError::SourceFetch {
                        source_name: source.name().to_string(),
                        query: self.query.to_string(),
                        cause: Arc::new(e),
                    };
                    if !source.allow_errors() {
                        return Err(err);
                    }
                    tracing::warn!(source = source.name(), error = %err, "ignoring failed config source");
                }
            }
        }

        for transformer in &self.transformers {
            merged = transformer
                .transform(merged)
                .await
                .map_err(|e| ConfigError::Transform {
                    transformer: transformer.name().to_string(),
                    cause: Arc::new(e),
                })?;
        }
        Ok(merged)
    }

    fn publish(&self, tree: ConfigTree) -> Result<ConfigTree, ConfigError> {
        let _dispatch = lock(&self.dispatch);

        let derives: Vec<(u64, Derive)> = {
            let state = lock(&self.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable config"));
            }
            if state.current.as_ref() == Some(&tree) {
                tracing::debug!(query = %self.query, "configuration unchanged");
                return Ok(tree);
            }
            state.tracked.iter().map(|t| (t.id, t.derive.clone())).collect()
        };

        let mut updates = Vec::with_capacity(derives.len());
        for (id, derive) in derives {
            updates.push((id, derive(&tree)?));
        }

        let mut updates: Vec<Apply> = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable config"));
            }
            state.current = Some(tree.clone());
            updates
                .into_iter()
                .filter(|(id, _)| state.tracked.iter().any(|t| t.id == *id))
                .map(|(_, apply)| apply)
                .collect()
        };
        if self.order == NotifyOrder::Reverse {
            updates.reverse();
        }

        tracing::info!(
            query = %self.query,
            fingerprint = %tree.fingerprint(),
            derived = updates.len(),
            "configuration updated"
        );

        let _marker = Dispatching::enter(&self.state);
        for apply in updates {
            apply();
        }
        Ok(tree)
    }

    fn record(&self, result: &Result<ConfigTree, ConfigError>) {
        let mut state = lock(&self.state);
        match result {
            Ok(_) => {
                state.last_refreshed = Some(Instant::now());
                state.last_error = None;
            }
            Err(ConfigError::Closed(_)) => {}
            Err(e) => state.last_error = Some(e.clone()),
        }
    }
}

/// Marks the current thread as publishing for the lifetime of the guard.
struct Dispatching<'a> {
    state: &'a Mutex<State>,
}

impl<'a> Dispatching<'a> {
    fn enter(state: &'a Mutex<State>) -> Self {
        lock(state).dispatching = Some(thread::current().id());
        Self { state }
    }
}

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        lock(self.state).dispatching = None;
    }
}

/// Clears the in-flight marker when the leading refresh finishes or is dropped.
struct InFlight<'a> {
    state: &'a Mutex<State>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.state).in_flight = None;
    }
}

enum Role {
    Leader(watch::Sender<Outcome>),
    Follower(watch::Receiver<Outcome>),
}

/// Merged, transformed configuration with hot-reloadable derived values.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ReloadableConfig {
    inner: Arc<Inner>,
}

impl ReloadableConfig {
    #[must_use]
    pub fn builder(query: ConfigQuery) -> ReloadableConfigBuilder {
        ReloadableConfigBuilder::new(query)
    }

    #[must_use]
    pub fn query(&self) -> &ConfigQuery {
        &self.inner.query
    }

    #[must_use]
    pub fn current(&self) -> Option<ConfigTree> {
        lock(&self.inner.state).current.clone()
    }

    /// When the last successful refresh completed.
    #[must_use]
    pub fn last_refreshed(&self) -> Option<Instant> {
        lock(&self.inner.state).last_refreshed
    }

    /// The failure of the most recent refresh, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<ConfigError> {
        lock(&self.inner.state).last_error.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Fetch, merge and transform, then publish if the tree changed.
    ///
    /// Callers arriving while a refresh is in flight share its outcome.
    pub async fn refresh(&self) -> Result<ConfigTree, ConfigError> {
        let role = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable config"));
            }
            match &state.in_flight {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                let outcome = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| ConfigError::RefreshAborted)?;
                (*outcome).clone().unwrap_or(Err(ConfigError::RefreshAborted))
            }
            Role::Leader(tx) => {
                let _in_flight = InFlight {
                    state: &self.inner.state,
                };
                let result = match self.inner.fetch().await {
                    Ok(tree) => self.inner.publish(tree),
                    Err(e) => Err(e),
                };
                self.inner.record(&result);
                if let Err(e) = &result {
                    tracing::debug!(query = %self.inner.query, error = %e, "refresh failed");
                }
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }

    /// The current tree, or the outcome of a refresh bounded by the get
    /// timeout. An elapsed wait is [`ConfigError::Timeout`]; the refresh
    /// itself keeps running in the background.
    pub async fn get_or_refresh(&self) -> Result<ConfigTree, ConfigError> {
        if let Some(tree) = self.current() {
            return Ok(tree);
        }
        let timeout = self.inner.get_timeout;
        let this = self.clone();
        let task = tokio::spawn(async move { this.refresh().await });
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "refresh task failed");
                Err(ConfigError::RefreshAborted)
            }
            Err(_) => Err(ConfigError::Timeout { timeout }),
        }
    }

    /// Track a value computed from the tree by `extract`.
    ///
    /// When a tree is already loaded the returned reloadable is seeded
    /// from it; a seeding failure is returned and nothing is tracked.
    /// `extract` must not call back into this config.
    pub fn register_with<T, F>(&self, extract: F) -> Result<Reloadable<T>, ConfigError>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&ConfigTree) -> Result<Option<T>, ConfigError> + Send + Sync + 'static,
    {
        if lock(&self.inner.state).dispatching == Some(thread::current().id()) {
            return Err(ConfigError::Reentrant("registration"));
        }
        let _dispatch = lock(&self.inner.dispatch);

        let current = {
            let state = lock(&self.inner.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable config"));
            }
            state.current.clone()
        };
        let seed = match &current {
            Some(tree) => extract(tree)?,
            None => None,
        };

        let publisher = Arc::new(Publisher::with_order(seed, NotifyOrder::Registration));
        let reloadable = publisher.reloadable();

        let derive: Derive = {
            let publisher = publisher.clone();
            Arc::new(move |tree: &ConfigTree| {
                extract(tree).map(|value| {
                    let publisher = publisher.clone();
                    Box::new(move || {
                        if let Err(e) = publisher.replace(value) {
                            tracing::debug!(error = %e, "skipping update of closed reloadable");
                        }
                    }) as Apply
                })
            })
        };
        let close: Box<dyn Fn() + Send + Sync> = {
            let publisher = publisher.clone();
            Box::new(move || publisher.close())
        };

        let id = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable config"));
            }
            let id = state.next_id;
            state.next_id += 1;
            state.tracked.push(Tracked { id, derive, close });
            id
        };

        let weak = Arc::downgrade(&self.inner);
        publisher.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.state).tracked.retain(|t| t.id != id);
            }
        });
        Ok(reloadable)
    }

    /// Track the value at `path`, deserialized with scalar coercion.
    /// A missing path yields an empty reloadable.
    pub fn register_path<T>(&self, path: &str) -> Result<Reloadable<T>, ConfigError>
    where
        T: DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
    {
        let path = path.to_string();
        self.register_with(move |tree| tree.get_as::<T>(&path))
    }

    /// Track the subtree at `path` (the root when empty) mapped through
    /// the configured [`BeanMapper`].
    pub fn register_bean<T>(&self, path: &str) -> Result<Reloadable<T>, ConfigError>
    where
        T: DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
    {
        let path = path.trim().to_string();
        let mapper = self.inner.mapper.clone();
        self.register_with(move |tree| {
            let value = if path.is_empty() {
                Some(tree.to_value())
            } else {
                tree.get(&path).cloned()
            };
            value
                .map(|value| map_bean::<T>(mapper.as_ref(), value, &path))
                .transpose()
        })
    }

    /// Track the whole tree.
    pub fn tree(&self) -> Result<Reloadable<ConfigTree>, ConfigError> {
        self.register_with(|tree| Ok(Some(tree.clone())))
    }

    /// Spawn the periodic refresh loop when a refresh interval is set.
    ///
    /// The first refresh runs immediately; failures are logged and the
    /// loop keeps going until [`close`](Self::close).
    #[must_use]
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let interval = self.inner.refresh_interval?;
        let shutdown = self.inner.shutdown.subscribe();
        let this = self.clone();
        Some(tokio::spawn(async move {
            this.refresh_loop(interval, shutdown).await;
        }))
    }

    async fn refresh_loop(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    tracing::debug!("config refresh loop shutting down");
                    return;
                }
            }

            match self.refresh().await {
                Ok(_) => {}
                Err(ConfigError::Closed(_)) => break,
                Err(e) => {
                    tracing::error!(query = %self.inner.query, error = %e, "periodic config refresh failed");
                }
            }
        }
        tracing::debug!("config refresh loop stopped");
    }

    /// Stop the refresh loop, close every derived reloadable and every
    /// source. Idempotent.
    pub fn close(&self) {
        let tracked = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.tracked)
        };
        self.inner.shutdown.send_replace(true);

        for entry in &tracked {
            (entry.close)();
        }
        for source in &self.inner.sources {
            if let Err(e) = source.close() {
                tracing::error!(source = source.name(), error = %e, "failed to close config source");
            }
        }
        tracing::info!(query = %self.inner.query, derived = tracked.len(), "reloadable config closed");
    }
}

impl fmt::Debug for ReloadableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        let sources: Vec<&str> = self.inner.sources.iter().map(|s| s.name()).collect();
        let transformers: Vec<&str> = self.inner.transformers.iter().map(|t| t.name()).collect();
        f.debug_struct("ReloadableConfig")
            .field("query", &self.inner.query)
            .field("sources", &sources)
            .field("transformers", &transformers)
            .field("mapper", &self.inner.mapper.name())
            .field("loaded", &state.current.is_some())
            .field("derived", &state.tracked.len())
            .field("closed", &state.closed)
            .finish()
    }
}

pub struct ReloadableConfigBuilder {
    query: ConfigQuery,
    sources: Vec<Box<dyn ConfigSource>>,
    transformers: Vec<Box<dyn ConfigTransformer>>,
    mapper: Arc<dyn BeanMapper>,
    order: NotifyOrder,
    get_timeout: Duration,
    refresh_interval: Option<Duration>,
}

impl ReloadableConfigBuilder {
    fn new(query: ConfigQuery) -> Self {
        Self {
            query,
            sources: Vec::new(),
            transformers: Vec::new(),
            mapper: Arc::new(RelaxedMapper),
            order: NotifyOrder::Registration,
            get_timeout: DEFAULT_GET_TIMEOUT,
            refresh_interval: None,
        }
    }

    #[must_use]
    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Append already boxed sources, keeping their order.
    #[must_use]
    pub fn sources(mut self, sources: impl IntoIterator<Item = Box<dyn ConfigSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    #[must_use]
    pub fn transformer(mut self, transformer: impl ConfigTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    #[must_use]
    pub fn transformers(
        mut self,
        transformers: impl IntoIterator<Item = Box<dyn ConfigTransformer>>,
    ) -> Self {
        self.transformers.extend(transformers);
        self
    }

    #[must_use]
    pub fn mapper(mut self, mapper: Arc<dyn BeanMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    #[must_use]
    pub const fn update_order(mut self, order: NotifyOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub const fn get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    /// Period of the loop spawned by [`ReloadableConfig::start`]. Zero
    /// disables it.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    #[must_use]
    pub fn build(self) -> ReloadableConfig {
        let (shutdown, _) = watch::channel(false);
        ReloadableConfig {
            inner: Arc::new(Inner {
                query: self.query,
                sources: self.sources,
                transformers: self.transformers,
                mapper: self.mapper,
                order: self.order,
                get_timeout: self.get_timeout,
                refresh_interval: self.refresh_interval,
                state: Mutex::new(State::default()),
                dispatch: Mutex::new(()),
                shutdown,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend the tests can rewrite between refreshes.
    #[derive(Clone)]
    struct Backend {
        value: Arc<Mutex<Result<Value, String>>>,
        calls: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl Backend {
        fn new(value: Value) -> Self {
            Self {
                value: Arc::new(Mutex::new(Ok(value))),
                calls: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn set(&self, value: Value) {
            *self.value.lock().unwrap() = Ok(value);
        }

        fn fail(&self, message: &str) {
            *self.value.lock().unwrap() = Err(message.to_string());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn source(&self) -> TestSource {
            TestSource {
                backend: self.clone(),
                delay: Duration::ZERO,
                allow_errors: false,
            }
        }
    }

    struct TestSource {
        backend: Backend,
        delay: Duration,
        allow_errors: bool,
    }

    #[async_trait]
    impl ConfigSource for TestSource {
        fn name(&self) -> &str {
            "test"
        }

        async fn get(&self, _query: &ConfigQuery) -> Result<ConfigTree, ConfigError> {
            self.backend.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let value = self.backend.value.lock().unwrap().clone();
            match value {
                Ok(value) => ConfigTree::from_value(value),
                Err(message) => Err(ConfigError::InvalidSettings(message)),
            }
        }

        fn allow_errors(&self) -> bool {
            self.allow_errors
        }

        fn close(&self) -> Result<(), ConfigError> {
            self.backend.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTransformer;

    #[async_trait]
    impl ConfigTransformer for FailingTransformer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn transform(&self, _tree: ConfigTree) -> Result<ConfigTree, ConfigError> {
            Err(ConfigError::InvalidSettings("boom".into()))
        }
    }

    fn query() -> ConfigQuery {
        ConfigQuery::for_app("billing").unwrap()
    }

    fn config(backend: &Backend) -> ReloadableConfig {
        ReloadableConfig::builder(query()).source(backend.source()).build()
    }

    fn record<T: Clone + PartialEq + Send + Sync + 'static>(
        reloadable: &Reloadable<T>,
    ) -> Arc<Mutex<Vec<Option<T>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        reloadable.register(move |v: Option<&T>| sink.lock().unwrap().push(v.cloned()));
        seen
    }

    #[tokio::test]
    async fn refresh_notifies_only_when_the_value_changes() {
        let backend = Backend::new(json!({"port": 8080, "name": "a"}));
        let config = config(&backend);
        let port = config.register_path::<u16>("port").unwrap();
        assert!(port.is_empty());
        let seen = record(&port);

        config.refresh().await.unwrap();
        config.refresh().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(8080)]);

        // The tree changes but the port does not.
        backend.set(json!({"port": "8080", "name": "b"}));
        config.refresh().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(8080)]);

        backend.set(json!({"name": "b"}));
        config.refresh().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(8080), None]);
        assert!(config.last_refreshed().is_some());
    }

    #[tokio::test]
    async fn registration_after_load_is_seeded() {
        let backend = Backend::new(json!({"db": {"host": "h1"}}));
        let config = config(&backend);
        config.refresh().await.unwrap();

        let host = config.register_path::<String>("db.host").unwrap();
        assert_eq!(host.get().unwrap(), "h1");
        let whole = config.tree().unwrap();
        assert_eq!(whole.get().unwrap(), config.current().unwrap());
    }

    #[tokio::test]
    async fn failed_refresh_leaves_state_intact() {
        let backend = Backend::new(json!({"port": 1}));
        let config = config(&backend);
        let port = config.register_path::<u16>("port").unwrap();
        config.refresh().await.unwrap();
        let before = config.current();

        backend.fail("backend down");
        let err = config.refresh().await.unwrap_err();
        assert!(matches!(err, ConfigError::SourceFetch { ref source_name, .. } if source_name == "test"));
        assert_eq!(config.current(), before);
        assert_eq!(port.current(), Some(1));
        assert!(config.last_error().is_some());

        backend.set(json!({"port": 2}));
        config.refresh().await.unwrap();
        assert!(config.last_error().is_none());
        assert_eq!(port.current(), Some(2));
    }

    #[tokio::test]
    async fn tolerant_source_is_skipped() {
        let good = Backend::new(json!({"a": 1}));
        let bad = Backend::new(json!({}));
        bad.fail("unreachable");
        let mut tolerant = bad.source();
        tolerant.allow_errors = true;

        let config = ReloadableConfig::builder(query())
            .source(good.source())
            .source(tolerant)
            .build();
        let tree = config.refresh().await.unwrap();
        assert_eq!(tree.into_value(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn later_sources_win() {
        let base = Backend::new(json!({"db": {"host": "base", "port": 1}}));
        let overlay = Backend::new(json!({"db": {"host": "overlay"}}));
        let config = ReloadableConfig::builder(query())
            .source(base.source())
            .source(overlay.source())
            .build();
        let tree = config.refresh().await.unwrap();
        assert_eq!(tree.into_value(), json!({"db": {"host": "overlay", "port": 1}}));
    }

    #[tokio::test]
    async fn extraction_failure_publishes_nothing() {
        let backend = Backend::new(json!({"port": 1, "name": "a"}));
        let config = config(&backend);
        let name = config.register_path::<String>("name").unwrap();
        config.register_path::<u16>("port").unwrap();
        config.refresh().await.unwrap();

        backend.set(json!({"port": "not-a-port", "name": "b"}));
        let err = config.refresh().await.unwrap_err();
        assert!(matches!(err, ConfigError::Extract { ref path, .. } if path == "port"));
        assert_eq!(name.current().as_deref(), Some("a"));
        assert_eq!(config.current().unwrap().get("name"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn transformer_failure_is_reported_by_name() {
        let backend = Backend::new(json!({"a": 1}));
        let config = ReloadableConfig::builder(query())
            .source(backend.source())
            .transformer(FailingTransformer)
            .build();
        let err = config.refresh().await.unwrap_err();
        assert!(matches!(err, ConfigError::Transform { ref transformer, .. } if transformer == "failing"));
        assert!(config.current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_fetch_once() {
        let backend = Backend::new(json!({"a": 1}));
        let mut source = backend.source();
        source.delay = Duration::from_millis(200);
        let config = ReloadableConfig::builder(query()).source(source).build();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let config = config.clone();
                tokio::spawn(async move { config.refresh().await })
            })
            .collect();
        for task in tasks {
            let tree = task.await.unwrap().unwrap();
            assert_eq!(tree.get("a"), Some(&json!(1)));
        }
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn dropped_leader_aborts_followers_and_frees_the_next_refresh() {
        let backend = Backend::new(json!({"a": 1}));
        let mut source = backend.source();
        source.delay = Duration::from_millis(100);
        let config = ReloadableConfig::builder(query()).source(source).build();

        let leading = config.clone();
        let leader = tokio::spawn(async move { leading.refresh().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let following = config.clone();
        let follower = tokio::spawn(async move { following.refresh().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        assert!(matches!(follower.await.unwrap(), Err(ConfigError::RefreshAborted)));
        assert!(config.current().is_none());

        let tree = config.refresh().await.unwrap();
        assert_eq!(tree.get("a"), Some(&json!(1)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn get_or_refresh_times_out_distinctly() {
        let backend = Backend::new(json!({"a": 1}));
        let mut source = backend.source();
        source.delay = Duration::from_secs(5);
        let config = ReloadableConfig::builder(query())
            .source(source)
            .get_timeout(Duration::from_millis(50))
            .build();
        let err = config.get_or_refresh().await.unwrap_err();
        assert!(err.is_timeout());

        let failing = Backend::new(json!({}));
        failing.fail("down");
        let err = config_with_timeout(&failing).get_or_refresh().await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(matches!(err, ConfigError::SourceFetch { .. }));
    }

    fn config_with_timeout(backend: &Backend) -> ReloadableConfig {
        ReloadableConfig::builder(query())
            .source(backend.source())
            .get_timeout(Duration::from_secs(5))
            .build()
    }

    #[tokio::test]
    async fn get_or_refresh_returns_current_without_fetching() {
        let backend = Backend::new(json!({"a": 1}));
        let config = config(&backend);
        config.refresh().await.unwrap();
        config.get_or_refresh().await.unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn reverse_order_publishes_last_registered_first() {
        let backend = Backend::new(json!({"a": 1, "b": 2}));
        let order = Arc::new(Mutex::new(Vec::new()));
        let config = ReloadableConfig::builder(query())
            .source(backend.source())
            .update_order(NotifyOrder::Reverse)
            .build();
        for key in ["a", "b"] {
            let order = order.clone();
            config
                .register_path::<u8>(key)
                .unwrap()
                .register(move |_| order.lock().unwrap().push(key));
        }
        config.refresh().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn closing_a_derived_reloadable_untracks_it() {
        let backend = Backend::new(json!({"a": 1}));
        let config = config(&backend);
        let a = config.register_path::<u8>("a").unwrap();
        let _b = config.register_path::<u8>("a").unwrap();
        assert_eq!(lock(&config.inner.state).tracked.len(), 2);

        a.close();
        assert_eq!(lock(&config.inner.state).tracked.len(), 1);
        config.refresh().await.unwrap();
        assert!(a.is_empty());
    }

    #[tokio::test]
    async fn registering_from_a_listener_is_rejected() {
        let backend = Backend::new(json!({"a": 1}));
        let config = config(&backend);
        let outcome = Arc::new(Mutex::new(None));
        let inner_config = config.clone();
        let sink = outcome.clone();
        config.register_path::<u8>("a").unwrap().register(move |_| {
            let result = inner_config.register_path::<u8>("a");
            *sink.lock().unwrap() = Some(result.map(|_| ()));
        });

        config.refresh().await.unwrap();
        let result = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(ConfigError::Reentrant(_))));
        config.close();
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Pool {
        host: String,
        max_size: u32,
    }

    #[tokio::test]
    async fn beans_map_relaxed_keys() {
        let backend = Backend::new(json!({"db": {"host": "h", "max-size": 8}}));
        let config = config(&backend);
        let pool = config.register_bean::<Pool>("db").unwrap();
        let missing = config.register_bean::<Pool>("cache").unwrap();
        config.refresh().await.unwrap();
        assert_eq!(
            pool.get().unwrap(),
            Pool {
                host: "h".into(),
                max_size: 8
            }
        );
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let backend = Backend::new(json!({"a": 1}));
        let config = config(&backend);
        let a = config.register_path::<u8>("a").unwrap();
        config.refresh().await.unwrap();

        config.close();
        config.close();
        assert!(config.is_closed());
        assert!(a.is_closed());
        assert_eq!(a.current(), Some(1));
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(config.refresh().await, Err(ConfigError::Closed(_))));
        assert!(matches!(config.register_path::<u8>("a"), Err(ConfigError::Closed(_))));
    }

    #[tokio::test]
    async fn close_during_fetch_dispatches_nothing() {
        let backend = Backend::new(json!({"a": 1}));
        let mut source = backend.source();
        source.delay = Duration::from_millis(100);
        let config = ReloadableConfig::builder(query()).source(source).build();

        let refreshing = config.clone();
        let task = tokio::spawn(async move { refreshing.refresh().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        config.close();
        assert!(matches!(task.await.unwrap(), Err(ConfigError::Closed(_))));
        assert!(config.current().is_none());
    }

    #[tokio::test]
    async fn start_refreshes_periodically_until_closed() {
        let backend = Backend::new(json!({"a": 1}));
        let config = ReloadableConfig::builder(query())
            .source(backend.source())
            .refresh_interval(Duration::from_millis(20))
            .build();
        let a = config.register_path::<u8>("a").unwrap();
        let handle = config.start().unwrap();

        backend.set(json!({"a": 2}));
        let deadline = Instant::now() + Duration::from_secs(5);
        while a.current() != Some(2) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.current(), Some(2));

        config.close();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn start_without_interval_spawns_nothing() {
        let config = config(&Backend::new(json!({})));
        assert!(config.start().is_none());
    }
}
