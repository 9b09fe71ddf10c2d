use std::collections::HashMap;

use super::events::{Direction, ProtocolEvent};
use crate::error::PipelineError;

/// Pseudo-type matching every server-side event.
pub const SERVER_EVENT: &str = "server.*";
/// Pseudo-type matching every client-side event.
pub const CLIENT_EVENT: &str = "client.*";

/// Token returned by `on`/`once`, used to remove a specific handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnMut(&ProtocolEvent) + Send>;

struct Registration {
    id: u64,
    once: bool,
    handler: Handler,
}

/// Typed event dispatcher with synchronous fan-out.
///
/// Each streaming client owns its own bus, so multiple connections never
/// cross-talk. For one event, listeners for its exact type run first, then
/// listeners on the generic direction stream, all in registration order and
/// to completion before the next event is dispatched.
///
/// Handlers are passive observers: the bus is exclusively borrowed for the
/// whole dispatch, so a handler must not register, remove, or dispatch
/// through the owning client from inside its body.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<String, Vec<Registration>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact event type (or one of the `*_EVENT`
    /// pseudo-types).
    pub fn on(
        &mut self,
        event_type: &str,
        handler: impl FnMut(&ProtocolEvent) + Send + 'static,
    ) -> HandlerId {
        self.register(event_type, Box::new(handler), false)
    }

    /// Like `on`, but the handler is removed after its first invocation.
    pub fn once(
        &mut self,
        event_type: &str,
        handler: impl FnMut(&ProtocolEvent) + Send + 'static,
    ) -> HandlerId {
        self.register(event_type, Box::new(handler), true)
    }

    fn register(&mut self, event_type: &str, handler: Handler, once: bool) -> HandlerId {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Registration { id, once, handler });
        HandlerId(id)
    }

    /// Remove one handler, or every handler for the type when `handler` is
    /// `None`. Removing a handler (or type) that was never registered is a
    /// programming error.
    pub fn off(
        &mut self,
        event_type: &str,
        handler: Option<HandlerId>,
    ) -> Result<(), PipelineError> {
        let not_registered = || PipelineError::HandlerNotRegistered(event_type.to_string());

        let list = self
            .listeners
            .get_mut(event_type)
            .filter(|l| !l.is_empty())
            .ok_or_else(not_registered)?;

        match handler {
            Some(HandlerId(id)) => {
                let index = list
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or_else(not_registered)?;
                list.remove(index);
            }
            None => list.clear(),
        }
        Ok(())
    }

    /// Dispatch one event synchronously: exact-type listeners first, then
    /// the generic stream for the event's direction.
    pub fn dispatch(&mut self, event: &ProtocolEvent) {
        let generic = match event.direction {
            Direction::Server => SERVER_EVENT,
            Direction::Client => CLIENT_EVENT,
        };
        let exact = event.event_type.clone();
        self.dispatch_list(&exact, event);
        self.dispatch_list(generic, event);
    }

    fn dispatch_list(&mut self, key: &str, event: &ProtocolEvent) {
        let Some(list) = self.listeners.get_mut(key) else {
            return;
        };
        for registration in list.iter_mut() {
            (registration.handler)(event);
        }
        list.retain(|r| !r.once);
    }
}
