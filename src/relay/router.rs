//! Event forwarding: the per-connection receive loop.
//!
//! Each inbound event has its target's first segment resolved against the
//! registry. A hit fans the rewritten event out to every connection under
//! that identity; a miss on a message bounces an `Error` back to the sender,
//! and a miss on an error is dropped so failures never loop.
//!
//! Forwarding grows a message by one author segment and a bounce repeats
//! the author beside the wrapped message. Messages larger than
//! [`MAX_EVENT_LENGTH`] are bounced without forwarding, so everything the
//! router writes still fits in one frame.

use std::fmt;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::address::{prepend_hop, resolve};
use super::codec::MAX_FRAME_LENGTH;
use super::event::{Event, Message};
use super::metrics;
use super::registry::{Registration, Registry, Route};
use super::wire::Frame;

/// Largest encoded message the router forwards. Half a frame, less room
/// for the error and frame envelopes: a bounce of a message this size,
/// whose author may fill most of it, still fits in [`MAX_FRAME_LENGTH`].
pub const MAX_EVENT_LENGTH: usize = MAX_FRAME_LENGTH / 2 - 512;

/// What the router did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Fanned out to `recipients` connections; `delivered` were still open.
    Forwarded { recipients: usize, delivered: usize },
    /// No route for a message; an error went back to the sender.
    Bounced,
    /// No route for an error event; discarded.
    Dropped,
    /// Unrecognised event type.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Route one event received from `sender` on the connection `origin`.
    pub fn route(&self, sender: &str, origin: &Route, event: Event) -> Outcome {
        let size = match &event {
            Event::Message(_) => event.encoded_len(),
            _ => 0,
        };
        match event {
            Event::Message(msg) => {
                if size > MAX_EVENT_LENGTH {
                    debug!(sender, size, "message too large, bouncing");
                    metrics::oversized_event();
                    return bounce(origin, msg);
                }

                let (local, remainder) = resolve(&msg.target);
                match self.registry.lookup(&local) {
                    Some(routes) => {
                        let forwarded = Event::Message(Message {
                            target: remainder,
                            author: prepend_hop(sender, &msg.author),
                            time: msg.time,
                            data: msg.data,
                        });
                        fan_out(&routes, &forwarded)
                    }
                    None => {
                        debug!(sender, to = %msg.target, "no route, bouncing");
                        metrics::route_miss();
                        bounce(origin, msg)
                    }
                }
            }
            Event::Error { target, event } => {
                let (local, remainder) = resolve(&target);
                match self.registry.lookup(&local) {
                    Some(routes) => {
                        let forwarded = Event::Error {
                            target: remainder,
                            event,
                        };
                        fan_out(&routes, &forwarded)
                    }
                    None => {
                        debug!(sender, to = %target, "no route for error, dropping");
                        metrics::error_dropped();
                        Outcome::Dropped
                    }
                }
            }
            Event::Unknown => {
                warn!(sender, "ignoring unknown event type");
                metrics::unknown_event();
                Outcome::Ignored
            }
        }
    }

    /// Drive one registered connection until its transport ends.
    ///
    /// Inbound frames are routed; events queued for this connection by any
    /// sender are written back out. The registration is released when this
    /// future completes or is dropped.
    pub async fn serve<T, E>(
        &self,
        registration: Registration,
        mut outbound: mpsc::UnboundedReceiver<Event>,
        mut transport: T,
    ) where
        T: Stream<Item = Result<Frame, E>> + Sink<Frame, Error = E> + Unpin,
        E: fmt::Display,
    {
        let identity = registration.identity().to_owned();
        let id = registration.id();
        info!(identity, %id, "stream open");

        loop {
            tokio::select! {
                frame = transport.next() => {
                    match frame {
                        Some(Ok(Frame::Event { event })) => {
                            let kind = event.kind();
                            let outcome = self.route(&identity, registration.route(), event);
                            debug!(identity, kind, ?outcome, "routed");
                        }
                        Some(Ok(other)) => {
                            warn!(identity, ?other, "unexpected frame on open stream");
                        }
                        Some(Err(e)) => {
                            warn!(identity, %id, "stream error: {e}");
                            break;
                        }
                        None => break,
                    }
                }

                Some(event) = outbound.recv() => {
                    if let Err(e) = transport.send(Frame::from(event)).await {
                        warn!(identity, %id, "send failed: {e}");
                        break;
                    }
                }
            }
        }

        info!(identity, %id, "stream closed");
    }
}

/// Return an undeliverable message to the connection that sent it,
/// addressed back along its author chain.
fn bounce(origin: &Route, msg: Message) -> Outcome {
    let error = Event::Error {
        target: msg.author.clone(),
        event: Box::new(Event::Message(msg)),
    };
    if !origin.send(error) {
        metrics::send_failed();
    }
    Outcome::Bounced
}

/// Queue `event` for every route. Closed queues are counted and skipped.
fn fan_out(routes: &[Route], event: &Event) -> Outcome {
    let mut delivered = 0;
    for route in routes {
        if route.send(event.clone()) {
            delivered += 1;
        } else {
            debug!(id = %route.id, "recipient gone, skipping");
            metrics::send_failed();
        }
    }
    metrics::events_forwarded(delivered);
    Outcome::Forwarded {
        recipients: routes.len(),
        delivered,
    }
}
