//! Observable single-value cells with change-only notification.
//!
//! A [`Publisher`] owns the cell and is the only handle that can change
//! its value; [`Reloadable`] is the cloneable read side handed to
//! consumers. Listeners run synchronously on the thread that changed the
//! value, in registration order (or reverse order, see [`NotifyOrder`]),
//! and only when the new value differs from the previous one.
//!
//! A listener that updates the same publisher from inside a notification
//! does not deadlock: the update is queued and applied once the current
//! round of notifications has finished.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::error::ConfigError;

/// Callback invoked with the new value, or `None` when the value is cleared.
pub type Listener<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyOrder {
    #[default]
    Registration,
    Reverse,
}

struct State<T> {
    value: Option<T>,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    closed: bool,
    notifying: Option<ThreadId>,
    deferred: VecDeque<Option<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    // Serializes whole set-and-notify rounds so concurrent setters deliver in order.
    notify: Mutex<()>,
    order: NotifyOrder,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn new(value: Option<T>, order: NotifyOrder) -> Self {
        Self {
            state: Mutex::new(State {
                value,
                listeners: Vec::new(),
                next_id: 0,
                closed: false,
                notifying: None,
                deferred: VecDeque::new(),
            }),
            notify: Mutex::new(()),
            order,
            on_close: Mutex::new(None),
        }
    }

    fn update(&self, value: Option<T>) -> Result<bool, ConfigError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ConfigError::Closed("reloadable"));
            }
            if state.notifying == Some(thread::current().id()) {
                state.deferred.push_back(value);
                return Ok(false);
            }
        }

        let _round = lock(&self.notify);
        let _marker = NotifyingMarker::enter(&self.state);
        Ok(self.deliver(Some(value)).unwrap_or(false))
    }

    /// Apply `next` and then every deferred update. Caller holds the round
    /// lock and the notifying marker. Returns whether the first one changed
    /// the value.
    fn deliver(&self, mut next: Option<Option<T>>) -> Option<bool> {
        let mut first_changed = None;
        while let Some(value) = next.take() {
            let listeners = {
                let mut state = lock(&self.state);
                if state.closed {
                    break;
                }
                if state.value == value {
                    None
                } else {
                    state.value.clone_from(&value);
                    let mut listeners: Vec<Listener<T>> =
                        state.listeners.iter().map(|(_, l)| l.clone()).collect();
                    if self.order == NotifyOrder::Reverse {
                        listeners.reverse();
                    }
                    Some(listeners)
                }
            };

            let changed = listeners.is_some();
            first_changed.get_or_insert(changed);
            for listener in listeners.unwrap_or_default() {
                listener(value.as_ref());
            }

            next = lock(&self.state).deferred.pop_front();
        }
        first_changed
    }

    fn register(self: &Arc<Self>, listener: Listener<T>) -> ListenerHandle<T> {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        if !state.closed {
            state.listeners.push((id, listener));
        }
        ListenerHandle {
            id,
            inner: Arc::downgrade(self),
        }
    }

    fn register_and_call(self: &Arc<Self>, listener: Listener<T>) -> ListenerHandle<T> {
        let call = || {
            let value = lock(&self.state).value.clone();
            if let Some(value) = value {
                listener(Some(&value));
            }
        };
        // Inside a listener this thread already holds the round lock.
        if lock(&self.state).notifying == Some(thread::current().id()) {
            let handle = self.register(listener.clone());
            call();
            return handle;
        }

        let _round = lock(&self.notify);
        let _marker = NotifyingMarker::enter(&self.state);
        let handle = self.register(listener.clone());
        call();
        let deferred = lock(&self.state).deferred.pop_front();
        self.deliver(deferred);
        handle
    }

    fn close(&self) {
        let hook = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.listeners.clear();
            state.deferred.clear();
            lock(&self.on_close).take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Marks the current thread as notifying for the lifetime of the guard,
/// also when a listener panics.
struct NotifyingMarker<'a, T> {
    state: &'a Mutex<State<T>>,
}

impl<'a, T> NotifyingMarker<'a, T> {
    fn enter(state: &'a Mutex<State<T>>) -> Self {
        lock(state).notifying = Some(thread::current().id());
        Self { state }
    }
}

impl<T> Drop for NotifyingMarker<'_, T> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.notifying = None;
        state.deferred.clear();
    }
}

/// Read side of an observable value.
pub struct Reloadable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Reloadable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Reloadable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    #[must_use]
    pub fn is_present(&self) -> bool {
        lock(&self.inner.state).value.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_present()
    }

    /// The current value, failing with [`ConfigError::NoValue`] when empty.
    pub fn get(&self) -> Result<T, ConfigError> {
        self.current().ok_or(ConfigError::NoValue)
    }

    #[must_use]
    pub fn current(&self) -> Option<T> {
        lock(&self.inner.state).value.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Add a listener for future changes. It is not invoked immediately.
    pub fn register<F>(&self, listener: F) -> ListenerHandle<T>
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.inner.register(Arc::new(listener))
    }

    /// Add a listener and, if a value is present, invoke it once with that
    /// value before returning.
    pub fn if_present_and_register<F>(&self, listener: F) -> ListenerHandle<T>
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.inner.register_and_call(Arc::new(listener))
    }

    /// Drop every listener and detach from the owner. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl<T> fmt::Debug for Reloadable<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Reloadable")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Owner side of an observable value.
pub struct Publisher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Publisher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(None, NotifyOrder::Registration)
    }

    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self::with_order(Some(value), NotifyOrder::Registration)
    }

    #[must_use]
    pub fn with_order(value: Option<T>, order: NotifyOrder) -> Self {
        Self {
            inner: Arc::new(Inner::new(value, order)),
        }
    }

    #[must_use]
    pub fn reloadable(&self) -> Reloadable<T> {
        Reloadable {
            inner: self.inner.clone(),
        }
    }

    /// Store `value` and notify listeners if it differs from the current one.
    ///
    /// Returns whether listeners were notified.
    pub fn set(&self, value: T) -> Result<bool, ConfigError> {
        self.inner.update(Some(value))
    }

    /// Remove the value, notifying listeners with `None` if one was present.
    pub fn clear(&self) -> Result<bool, ConfigError> {
        self.inner.update(None)
    }

    /// Set or clear depending on `value`.
    pub fn replace(&self, value: Option<T>) -> Result<bool, ConfigError> {
        self.inner.update(value)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    pub fn close(&self) {
        self.inner.close();
    }

    /// Run `hook` once when the cell is closed from either side.
    pub(crate) fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let state = lock(&self.inner.state);
            if !state.closed {
                *lock(&self.inner.on_close) = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }
}

impl<T> Default for Publisher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Registration token returned by [`Reloadable::register`].
pub struct ListenerHandle<T> {
    id: u64,
    inner: Weak<Inner<T>>,
}

impl<T> ListenerHandle<T> {
    /// Stop delivering notifications to this listener. Idempotent.
    pub fn deregister(&self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.state).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T> fmt::Debug for ListenerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
