//! Where interaction signals come from.
//!
//! In a browser these are DOM events on `window`; in a desktop shell they
//! are whatever the windowing layer reports. The tracker only needs the
//! [`InteractionSource`] trait: attach a handler for a kind of signal, and
//! detach it again later.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::TrackerError;

// ---------------------------------------------------------------------------
// InteractionKind
// ---------------------------------------------------------------------------

/// A kind of user interaction that counts as "activity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    PointerMove,
    KeyDown,
    Click,
    Scroll,
    TouchStart,
}

impl InteractionKind {
    /// Every kind, in the order listeners are attached.
    pub const ALL: [Self; 5] = [
        Self::PointerMove,
        Self::KeyDown,
        Self::Click,
        Self::Scroll,
        Self::TouchStart,
    ];

    /// The DOM event name this kind corresponds to.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::PointerMove => "mousemove",
            Self::KeyDown => "keydown",
            Self::Click => "click",
            Self::Scroll => "scroll",
            Self::TouchStart => "touchstart",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

// ---------------------------------------------------------------------------
// InteractionSource
// ---------------------------------------------------------------------------

/// Opaque id for an attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback invoked for each interaction.
///
/// Handlers are passive: they run to completion, return nothing, and
/// cannot cancel or delay the interaction that triggered them.
pub type InteractionHandler = Arc<dyn Fn(InteractionKind) + Send + Sync>;

/// Something that can deliver interaction signals to handlers.
pub trait InteractionSource: Send + Sync + 'static {
    /// Registers `handler` for signals of `kind`.
    ///
    /// # Errors
    /// [`TrackerError::NoEventTarget`] when the host has nowhere to
    /// listen.
    fn attach(
        &self,
        kind: InteractionKind,
        handler: InteractionHandler,
    ) -> Result<ListenerId, TrackerError>;

    /// Removes a previously attached handler.
    ///
    /// # Errors
    /// [`TrackerError::UnknownListener`] if `id` isn't attached.
    fn detach(&self, id: ListenerId) -> Result<(), TrackerError>;
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// An in-process interaction source.
///
/// Host glue code forwards raw UI events into it with [`emit`](Self::emit).
/// Also the source used by tests.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, InteractionKind, InteractionHandler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one interaction to every handler attached for `kind`.
    /// Returns how many handlers ran.
    pub fn emit(&self, kind: InteractionKind) -> usize {
        // Snapshot first so a handler may attach/detach without deadlock.
        let handlers: Vec<InteractionHandler> = self
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler(kind);
        }
        handlers.len()
    }

    /// Total attached listeners, across all kinds.
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Attached listeners for one kind.
    pub fn listener_count_for(&self, kind: InteractionKind) -> usize {
        self.lock().iter().filter(|(_, k, _)| *k == kind).count()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<(ListenerId, InteractionKind, InteractionHandler)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl InteractionSource for EventBus {
    fn attach(
        &self,
        kind: InteractionKind,
        handler: InteractionHandler,
    ) -> Result<ListenerId, TrackerError> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, kind, handler));
        Ok(id)
    }

    fn detach(&self, id: ListenerId) -> Result<(), TrackerError> {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        if listeners.len() == before {
            return Err(TrackerError::UnknownListener(id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DetachedSource
// ---------------------------------------------------------------------------

/// A source for non-interactive contexts (server-side rendering, workers,
/// CLI tools). Every call fails with [`TrackerError::NoEventTarget`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSource;

impl InteractionSource for DetachedSource {
    fn attach(
        &self,
        _kind: InteractionKind,
        _handler: InteractionHandler,
    ) -> Result<ListenerId, TrackerError> {
        Err(TrackerError::NoEventTarget)
    }

    fn detach(&self, _id: ListenerId) -> Result<(), TrackerError> {
        Err(TrackerError::NoEventTarget)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> InteractionHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: InteractionKind| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_event_bus_emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let clicks = Arc::new(AtomicUsize::new(0));
        bus.attach(InteractionKind::Click, counting_handler(&clicks))
            .unwrap();

        assert_eq!(bus.emit(InteractionKind::Scroll), 0);
        assert_eq!(bus.emit(InteractionKind::Click), 1);
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_bus_detach_removes_listener() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus
            .attach(InteractionKind::KeyDown, counting_handler(&counter))
            .unwrap();

        bus.detach(id).unwrap();

        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.emit(InteractionKind::KeyDown), 0);
        assert_eq!(bus.detach(id), Err(TrackerError::UnknownListener(id)));
    }

    #[test]
    fn test_event_bus_listener_ids_are_unique() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = bus
            .attach(InteractionKind::Click, counting_handler(&counter))
            .unwrap();
        let b = bus
            .attach(InteractionKind::Click, counting_handler(&counter))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(bus.listener_count_for(InteractionKind::Click), 2);
    }

    #[test]
    fn test_detached_source_refuses_attach() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = DetachedSource.attach(InteractionKind::Click, counting_handler(&counter));
        assert_eq!(result, Err(TrackerError::NoEventTarget));
    }

    #[test]
    fn test_interaction_kind_event_names() {
        assert_eq!(InteractionKind::PointerMove.event_name(), "mousemove");
        assert_eq!(InteractionKind::TouchStart.to_string(), "touchstart");
        assert_eq!(InteractionKind::ALL.len(), 5);
    }
}
