use std::sync::Arc;

/// Identifies one registered handler so it can be removed again.
pub type HandlerId = u64;

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Events that can be subscribed to by kind.
pub trait Classified {
    type Kind: Copy + Eq + std::fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Synchronous publish/subscribe registry.
///
/// Handlers run in registration order, on the emitting thread.
pub struct EventEmitter<E: Classified> {
    next_id: HandlerId,
    handlers: Vec<(E::Kind, HandlerId, Handler<E>)>,
}

impl<E: Classified> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            next_id: 1,
            handlers: Vec::new(),
        }
    }
}

impl<E: Classified> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: E::Kind, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((kind, id, Arc::new(handler)));
        id
    }

    /// Returns `false` if no handler with that id was registered for `kind`.
    pub fn off(&mut self, kind: E::Kind, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers
            .retain(|(handler_kind, handler_id, _)| !(*handler_kind == kind && *handler_id == id));
        self.handlers.len() != before
    }

    /// Handlers currently registered for `kind`, in registration order.
    ///
    /// Callers holding the emitter behind a lock take a snapshot and invoke
    /// it after releasing the lock.
    pub fn snapshot(&self, kind: E::Kind) -> Vec<Handler<E>> {
        self.handlers
            .iter()
            .filter(|(handler_kind, _, _)| *handler_kind == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect()
    }

    pub fn emit(&self, event: &E) {
        for handler in self.snapshot(event.kind()) {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Classified, EventEmitter};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ping {
        A(u8),
        B,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PingKind {
        A,
        B,
    }

    impl Classified for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            match self {
                Ping::A(_) => PingKind::A,
                Ping::B => PingKind::B,
            }
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<Ping>::new();
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            emitter.on(PingKind::A, move |_| seen.lock().unwrap().push(tag));
        }

        emitter.emit(&Ping::A(1));

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<Ping>::new();
        let sink = seen.clone();
        emitter.on(PingKind::B, move |event| sink.lock().unwrap().push(*event));

        emitter.emit(&Ping::A(7));
        emitter.emit(&Ping::B);

        assert_eq!(*seen.lock().unwrap(), vec![Ping::B]);
    }

    #[test]
    fn off_removes_a_single_handler() {
        let count = Arc::new(Mutex::new(0));
        let mut emitter = EventEmitter::<Ping>::new();
        let a = count.clone();
        let first = emitter.on(PingKind::A, move |_| *a.lock().unwrap() += 1);
        let b = count.clone();
        emitter.on(PingKind::A, move |_| *b.lock().unwrap() += 10);

        assert!(emitter.off(PingKind::A, first));
        assert!(!emitter.off(PingKind::A, first));
        assert!(!emitter.off(PingKind::B, 2));
        emitter.emit(&Ping::A(0));

        assert_eq!(*count.lock().unwrap(), 10);
        assert_eq!(emitter.len(), 1);
    }
}
