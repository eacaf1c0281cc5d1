//! # Callback Dispatcher
//!
//! Ordered handler pipelines keyed by [`EventKind`].
//!
//! Handlers for one kind run strictly in registration order. Each receives the
//! value produced by the previous handler and returns the value handed to the
//! next one; the last result is what the connection sends, applies or ignores.
//! A kind with no handlers passes its value through unchanged.
//!
//! The registry is filled before the connection is built and is read-only
//! afterwards, so dispatch takes no locks.

use crate::core::packet::{
    ClanChatMessage, ConnectRequest, ConnectResult, Control, Disconnect, GameChatMessage,
    GameData, KeepAlive, KeepAliveAck, Packet, WorldUpdate,
};
use crate::error::ErrorReport;
use crate::protocol::connection::ConnectionState;
use crate::session::EntityId;
use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// Outbound connect request.
    Connect,
    ConnectResult,
    /// Outbound keep-alive ping.
    KeepAlive,
    KeepAliveAck,
    /// Outbound steering input.
    Control,
    /// Either direction.
    Disconnect,
    GameData,
    WorldUpdate,
    /// Either direction.
    GameChat,
    /// Either direction.
    ClanChat,
    /// The local player was found in the world description.
    PlayerReady,
    StateChanged,
    /// A connection-ending failure; fired once per failure.
    Error,
    /// Any packet without a dedicated kind.
    Packet,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Local player identified by the alias sent in the connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerReady {
    pub id: EntityId,
    /// Index the server uses for this player in control packets.
    pub player_index: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    Connect(ConnectRequest),
    ConnectResult(ConnectResult),
    KeepAlive(KeepAlive),
    KeepAliveAck(KeepAliveAck),
    Control(Control),
    Disconnect(Disconnect),
    GameData(GameData),
    WorldUpdate(WorldUpdate),
    GameChat(GameChatMessage),
    ClanChat(ClanChatMessage),
    PlayerReady(PlayerReady),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Error(ErrorReport),
    Packet(Packet),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect(_) => EventKind::Connect,
            Event::ConnectResult(_) => EventKind::ConnectResult,
            Event::KeepAlive(_) => EventKind::KeepAlive,
            Event::KeepAliveAck(_) => EventKind::KeepAliveAck,
            Event::Control(_) => EventKind::Control,
            Event::Disconnect(_) => EventKind::Disconnect,
            Event::GameData(_) => EventKind::GameData,
            Event::WorldUpdate(_) => EventKind::WorldUpdate,
            Event::GameChat(_) => EventKind::GameChat,
            Event::ClanChat(_) => EventKind::ClanChat,
            Event::PlayerReady(_) => EventKind::PlayerReady,
            Event::StateChanged { .. } => EventKind::StateChanged,
            Event::Error(_) => EventKind::Error,
            Event::Packet(_) => EventKind::Packet,
        }
    }

    /// Wrap a packet in its dedicated event, or [`Event::Packet`].
    pub fn from_packet(packet: Packet) -> Self {
        match packet {
            Packet::ConnectRequest(p) => Event::Connect(p),
            Packet::ConnectResult(p) => Event::ConnectResult(p),
            Packet::KeepAlive(p) => Event::KeepAlive(p),
            Packet::KeepAliveAck(p) => Event::KeepAliveAck(p),
            Packet::Control(p) => Event::Control(p),
            Packet::Disconnect(p) => Event::Disconnect(p),
            Packet::GameData(p) => Event::GameData(p),
            Packet::WorldUpdate(p) => Event::WorldUpdate(p),
            Packet::GameChat(p) => Event::GameChat(p),
            Packet::ClanChat(p) => Event::ClanChat(p),
            generic @ Packet::Generic { .. } => Event::Packet(generic),
        }
    }

    /// The packet carried by this event, if it carries one.
    pub fn into_packet(self) -> Option<Packet> {
        Some(match self {
            Event::Connect(p) => Packet::ConnectRequest(p),
            Event::ConnectResult(p) => Packet::ConnectResult(p),
            Event::KeepAlive(p) => Packet::KeepAlive(p),
            Event::KeepAliveAck(p) => Packet::KeepAliveAck(p),
            Event::Control(p) => Packet::Control(p),
            Event::Disconnect(p) => Packet::Disconnect(p),
            Event::GameData(p) => Packet::GameData(p),
            Event::WorldUpdate(p) => Packet::WorldUpdate(p),
            Event::GameChat(p) => Packet::GameChat(p),
            Event::ClanChat(p) => Packet::ClanChat(p),
            Event::Packet(p) => p,
            Event::PlayerReady(_) | Event::StateChanged { .. } | Event::Error(_) => return None,
        })
    }
}

type HandlerFn = dyn Fn(Event) -> BoxFuture<'static, Event> + Send + Sync + 'static;

/// Handler registry and dispatch.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Box<HandlerFn>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Dispatcher").field("handlers", &counts).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an async handler to the pipeline for `kind`.
    ///
    /// The future is awaited before the next handler runs. Returning an event
    /// of a different kind is a handler bug: the value is discarded and the
    /// pipeline continues with the previous one.
    pub fn register<F, Fut>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Event> + Send + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(move |event| handler(event).boxed()));
        self
    }

    /// Append a synchronous handler.
    pub fn register_sync<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(move |event| future::ready(handler(event)).boxed()));
        self
    }

    /// Append a handler that only looks at the value.
    pub fn observe<F>(&mut self, kind: EventKind, observer: F) -> &mut Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register_sync(kind, move |event| {
            observer(&event);
            event
        })
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Run `event` through the pipeline for its kind.
    pub async fn dispatch(&self, event: Event) -> Event {
        let kind = event.kind();
        let Some(pipeline) = self.handlers.get(&kind) else {
            return event;
        };

        let mut current = event;
        for (position, handler) in pipeline.iter().enumerate() {
            let next = handler(current.clone()).await;
            if next.kind() == kind {
                current = next;
            } else {
                warn!(
                    %kind,
                    returned = %next.kind(),
                    position,
                    "Handler returned an event of another kind; keeping previous value"
                );
            }
        }
        trace!(%kind, handlers = pipeline.len(), "Dispatched event");
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn chat(message: &str) -> Event {
        Event::GameChat(GameChatMessage {
            message: message.into(),
            ..GameChatMessage::default()
        })
    }

    fn message_of(event: &Event) -> String {
        match event {
            Event::GameChat(chat) => chat.message.clone(),
            other => panic!("expected GameChat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_handler_passes_through() {
        let dispatcher = Dispatcher::new();
        let out = dispatcher.dispatch(chat("hi")).await;
        assert_eq!(out, chat("hi"));
    }

    #[tokio::test]
    async fn test_handlers_chain_in_registration_order() {
        let mut dispatcher = Dispatcher::new();
        let append = |suffix: &'static str| {
            move |event: Event| match event {
                Event::GameChat(mut chat) => {
                    chat.message.push_str(suffix);
                    Event::GameChat(chat)
                }
                other => other,
            }
        };
        dispatcher
            .register_sync(EventKind::GameChat, append("-a"))
            .register(EventKind::GameChat, move |event| async move {
                // Suspends; the next handler must still see this one's output.
                tokio::time::sleep(Duration::from_millis(5)).await;
                append("-b")(event)
            })
            .register_sync(EventKind::GameChat, append("-c"));

        let out = dispatcher.dispatch(chat("x")).await;
        assert_eq!(message_of(&out), "x-a-b-c");
        assert_eq!(dispatcher.handler_count(EventKind::GameChat), 3);
        assert_eq!(dispatcher.handler_count(EventKind::ClanChat), 0);
    }

    #[tokio::test]
    async fn test_handlers_only_see_their_kind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        let seen = calls.clone();
        dispatcher.observe(EventKind::ClanChat, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(chat("x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        dispatcher
            .dispatch(Event::ClanChat(ClanChatMessage::default()))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_discarded() {
        let mut dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        dispatcher
            .register_sync(EventKind::GameChat, |_| {
                Event::KeepAliveAck(KeepAliveAck::default())
            })
            .observe(EventKind::GameChat, move |event| {
                seen.lock().expect("lock").push(message_of(event));
            });

        let out = dispatcher.dispatch(chat("kept")).await;
        assert_eq!(message_of(&out), "kept");
        assert_eq!(*log.lock().expect("lock"), vec!["kept".to_string()]);
    }

    #[test]
    fn test_packet_event_mapping() {
        let packet = Packet::KeepAliveAck(KeepAliveAck { sequence: Some(3) });
        let event = Event::from_packet(packet.clone());
        assert_eq!(event.kind(), EventKind::KeepAliveAck);
        assert_eq!(event.into_packet(), Some(packet));

        let report = Event::Error(ErrorReport {
            kind: crate::error::ErrorKind::Timeout,
            message: "Keep-alive timed out".into(),
        });
        assert_eq!(report.into_packet(), None);
    }
}
