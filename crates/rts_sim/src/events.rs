//! Change notifications.
//!
//! Subsystems append [`SimEvent`]s to an outbox during the tick; the
//! simulation forwards them to the subsystems' own hooks and then to every
//! listener registered on the [`EventBus`] for that kind of event.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::fight::AttackPhase;
use crate::objects::ObjectId;
use crate::work::WorkPhase;

/// Which part of the simulation caused a route change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Issuer {
    /// A player command.
    Command,
    /// The fight subsystem.
    Fight,
    /// The work subsystem.
    Work,
    /// Simulation housekeeping (object removal, restore).
    System,
}

/// Why a route went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteEndReason {
    /// The path and final orientation were completed.
    Ended,
    /// The owning object was removed.
    ObjectRemoved,
    /// Replaced or cancelled before completion.
    Aborted,
}

/// A change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// An object was spawned.
    ObjectAdded(ObjectId),
    /// An object left the table.
    ObjectRemoved(ObjectId),
    /// An object was killed. Always followed by [`SimEvent::ObjectRemoved`].
    ObjectDestroyed {
        /// The destroyed object.
        object: ObjectId,
        /// The attacker that landed the last hit.
        by: ObjectId,
    },
    /// An object moved or turned this tick.
    PoseChanged(ObjectId),
    /// An object's attack phase changed.
    FightStateChanged {
        /// The attacker.
        object: ObjectId,
        /// New phase.
        phase: AttackPhase,
    },
    /// An object's work phase changed.
    WorkStateChanged {
        /// The worker.
        object: ObjectId,
        /// New phase.
        phase: WorkPhase,
    },
    /// A route was created.
    RouteAdded {
        /// Route owner.
        object: ObjectId,
        /// Who created it.
        issuer: Issuer,
    },
    /// A route was removed.
    RouteRemoved {
        /// Route owner.
        object: ObjectId,
        /// Why.
        reason: RouteEndReason,
        /// Who removed it.
        issuer: Issuer,
    },
}

/// Event categories listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SimEvent::ObjectAdded`], [`SimEvent::ObjectRemoved`] and
    /// [`SimEvent::ObjectDestroyed`].
    Existence,
    /// [`SimEvent::PoseChanged`].
    Pose,
    /// [`SimEvent::FightStateChanged`].
    Fight,
    /// [`SimEvent::WorkStateChanged`].
    Work,
    /// [`SimEvent::RouteAdded`] and [`SimEvent::RouteRemoved`].
    Route,
}

impl EventKind {
    const COUNT: usize = 5;

    const fn index(self) -> usize {
        self as usize
    }
}

impl SimEvent {
    /// Category of the event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            SimEvent::ObjectAdded(_) | SimEvent::ObjectRemoved(_) | SimEvent::ObjectDestroyed { .. } => {
                EventKind::Existence
            }
            SimEvent::PoseChanged(_) => EventKind::Pose,
            SimEvent::FightStateChanged { .. } => EventKind::Fight,
            SimEvent::WorkStateChanged { .. } => EventKind::Work,
            SimEvent::RouteAdded { .. } | SimEvent::RouteRemoved { .. } => EventKind::Route,
        }
    }
}

/// Receiver of change notifications.
pub trait SimListener {
    /// Called once per event of a subscribed kind.
    fn on_event(&self, event: &SimEvent);
}

/// Per-kind listener lists.
#[derive(Default)]
pub struct EventBus {
    listeners: [Vec<Rc<dyn SimListener>>; EventKind::COUNT],
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<usize> = self.listeners.iter().map(Vec::len).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    /// Create a bus without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener unless that same instance is already registered
    /// for the kind. Returns whether it was added.
    pub fn add_listener_once(&mut self, kind: EventKind, listener: Rc<dyn SimListener>) -> bool {
        let list = &mut self.listeners[kind.index()];
        if list.iter().any(|l| Rc::ptr_eq(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Unregister a listener instance. Returns whether it was registered.
    pub fn remove_listener(&mut self, kind: EventKind, listener: &Rc<dyn SimListener>) -> bool {
        let list = &mut self.listeners[kind.index()];
        let before = list.len();
        list.retain(|l| !Rc::ptr_eq(l, listener));
        list.len() != before
    }

    /// Number of listeners for a kind.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners[kind.index()].len()
    }

    /// Deliver an event to the listeners of its kind, in registration order.
    pub fn publish(&self, event: &SimEvent) {
        for listener in &self.listeners[event.kind().index()] {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<SimEvent>>,
    }

    impl SimListener for Recorder {
        fn on_event(&self, event: &SimEvent) {
            self.seen.borrow_mut().push(*event);
        }
    }

    #[test]
    fn test_add_listener_once_is_idempotent() {
        let mut bus = EventBus::new();
        let recorder = Rc::new(Recorder::default());
        let listener: Rc<dyn SimListener> = recorder.clone();
        assert!(bus.add_listener_once(EventKind::Pose, listener.clone()));
        assert!(!bus.add_listener_once(EventKind::Pose, listener.clone()));
        assert!(bus.add_listener_once(EventKind::Route, listener.clone()));
        assert_eq!(bus.listener_count(EventKind::Pose), 1);

        bus.publish(&SimEvent::PoseChanged(ObjectId(4)));
        bus.publish(&SimEvent::ObjectAdded(ObjectId(4)));
        assert_eq!(recorder.seen.borrow().as_slice(), &[SimEvent::PoseChanged(ObjectId(4))]);

        assert!(bus.remove_listener(EventKind::Pose, &listener));
        assert!(!bus.remove_listener(EventKind::Pose, &listener));
    }

    #[test]
    fn test_multiple_listeners_in_order() {
        let mut bus = EventBus::new();
        let a = Rc::new(Recorder::default());
        let b = Rc::new(Recorder::default());
        bus.add_listener_once(EventKind::Existence, a.clone());
        bus.add_listener_once(EventKind::Existence, b.clone());
        bus.publish(&SimEvent::ObjectRemoved(ObjectId(1)));
        assert_eq!(a.seen.borrow().len(), 1);
        assert_eq!(b.seen.borrow().len(), 1);
    }
}
