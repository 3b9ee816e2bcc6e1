//! Per-event notification slots with replay-on-subscribe for terminal events.
//!
//! Every stream owns one `EventSlot` per event kind it can emit. A slot
//! created with [`EventSlot::persistent`] caches its (single) occurrence and
//! replays it, synchronously, to any listener attached afterwards — this is
//! what makes `end`, `error` and `finish` observable by late subscribers.

use crate::platform::SharedPtr;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a registered listener so it can later be detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn next_listener_id() -> ListenerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
}

enum Callback<A> {
    Every(SharedPtr<dyn Fn(&A)>),
    Once(SharedPtr<Cell<Option<Box<dyn FnOnce(&A)>>>>),
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        match self {
            Callback::Every(f) => Callback::Every(SharedPtr::clone(f)),
            Callback::Once(f) => Callback::Once(SharedPtr::clone(f)),
        }
    }
}

struct ListenerEntry<A> {
    id: ListenerId,
    callback: Callback<A>,
}

impl<A> Clone for ListenerEntry<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
        }
    }
}

struct SlotInner<A> {
    listeners: RefCell<Vec<ListenerEntry<A>>>,
    /// Cached occurrence for persistent slots; `None` until the event fires.
    fired: RefCell<Option<A>>,
    /// Present iff the slot is persistent.
    store: Option<Box<dyn Fn(&A) -> A>>,
    listeners_changed: RefCell<Option<Box<dyn Fn(usize)>>>,
}

/// Cloneable handle to a single event's subscription list.
pub struct EventSlot<A> {
    inner: SharedPtr<SlotInner<A>>,
}

impl<A> Clone for EventSlot<A> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<A: 'static> Default for EventSlot<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> EventSlot<A> {
    pub fn new() -> Self {
        Self {
            inner: SharedPtr::new(SlotInner {
                listeners: RefCell::new(Vec::new()),
                fired: RefCell::new(None),
                store: None,
                listeners_changed: RefCell::new(None),
            }),
        }
    }

    /// A slot whose single occurrence is cached and replayed to listeners
    /// subscribing after the fact.
    pub fn persistent() -> Self
    where
        A: Clone,
    {
        Self {
            inner: SharedPtr::new(SlotInner {
                listeners: RefCell::new(Vec::new()),
                fired: RefCell::new(None),
                store: Some(Box::new(|args: &A| args.clone())),
                listeners_changed: RefCell::new(None),
            }),
        }
    }

    /// Attach a listener invoked on every emission. If the slot already
    /// fired persistently, the listener is invoked immediately as well.
    pub fn on(&self, listener: impl Fn(&A) + 'static) -> ListenerId {
        if let Some(args) = self.replay_args() {
            listener(&args);
        }

        let id = next_listener_id();
        self.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            callback: Callback::Every(SharedPtr::new(listener)),
        });
        self.notify_listeners_changed();
        id
    }

    /// Attach a listener invoked at most once. A persistent slot that
    /// already fired invokes the listener immediately without registering.
    pub fn once(&self, listener: impl FnOnce(&A) + 'static) -> ListenerId {
        if let Some(args) = self.replay_args() {
            listener(&args);
            return next_listener_id();
        }

        let id = next_listener_id();
        self.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            callback: Callback::Once(SharedPtr::new(Cell::new(Some(Box::new(listener))))),
        });
        self.notify_listeners_changed();
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let removed = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let before = listeners.len();
            listeners.retain(|entry| entry.id != id);
            listeners.len() != before
        };
        if removed {
            self.notify_listeners_changed();
        }
    }

    pub fn remove_all(&self) {
        let had_any = !self.inner.listeners.borrow().is_empty();
        self.inner.listeners.borrow_mut().clear();
        if had_any {
            self.notify_listeners_changed();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.borrow().is_some()
    }

    /// Deliver to every listener. The listener list is snapshotted up
    /// front, so listeners added re-entrantly see only later emissions.
    pub fn emit(&self, args: &A) {
        for entry in self.begin_emit(args) {
            Self::invoke(&entry, args);
        }
    }

    /// Deliver to listeners one at a time in registration order, stopping
    /// as soon as `keep_going` reports false. This is the admission
    /// discipline drain notification needs: each listener may synchronously
    /// write, and the limit is re-checked before the next is admitted.
    /// A once-listener that was not admitted stays registered for the next
    /// emission.
    pub fn emit_each_while(&self, args: &A, mut keep_going: impl FnMut() -> bool) {
        if let Some(store) = &self.inner.store {
            *self.inner.fired.borrow_mut() = Some(store(args));
        }

        let snapshot = self.inner.listeners.borrow().clone();
        for entry in snapshot {
            if !keep_going() {
                break;
            }
            if matches!(entry.callback, Callback::Once(_)) {
                self.remove_listener(entry.id);
            }
            Self::invoke(&entry, args);
        }
    }

    pub(crate) fn set_listeners_changed(&self, hook: impl Fn(usize) + 'static) {
        *self.inner.listeners_changed.borrow_mut() = Some(Box::new(hook));
    }

    fn begin_emit(&self, args: &A) -> Vec<ListenerEntry<A>> {
        if let Some(store) = &self.inner.store {
            *self.inner.fired.borrow_mut() = Some(store(args));
        }

        let snapshot = self.inner.listeners.borrow().clone();
        let removed_once = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let before = listeners.len();
            listeners.retain(|entry| matches!(entry.callback, Callback::Every(_)));
            listeners.len() != before
        };
        if removed_once {
            self.notify_listeners_changed();
        }
        snapshot
    }

    fn invoke(entry: &ListenerEntry<A>, args: &A) {
        match &entry.callback {
            Callback::Every(f) => f(args),
            Callback::Once(cell) => {
                if let Some(f) = cell.take() {
                    f(args);
                }
            }
        }
    }

    fn replay_args(&self) -> Option<A> {
        let fired = self.inner.fired.borrow();
        match (fired.as_ref(), &self.inner.store) {
            (Some(args), Some(store)) => Some(store(args)),
            _ => None,
        }
    }

    fn notify_listeners_changed(&self) {
        let count = self.inner.listeners.borrow().len();
        let hook = self.inner.listeners_changed.borrow();
        if let Some(hook) = hook.as_ref() {
            hook(count);
        }
    }
}
