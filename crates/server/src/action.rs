//! Bounded, ordered registry of frame actions.
//!
//! Every decoded frame is handed to each registered [`Action`] in
//! registration order. Actions reply through the [`Responder`], which
//! buffers outgoing frames until the whole batch has run.

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::BytesMut;
use hixie_protocol::{Frame, encode_frame};

use crate::ServerError;

/// Registry capacity when none is configured.
pub const DEFAULT_ACTION_CAPACITY: usize = 5;

/// Something to run for every frame the client sends.
pub trait Action: Send + Sync + 'static {
    fn on_frame(&self, session: &mut Responder<'_>, frame: &Frame);
}

/// Adapter turning a closure or free function into an [`Action`].
pub struct FnAction<F>(pub F);

impl<F> Action for FnAction<F>
where
    F: Fn(&mut Responder<'_>, &Frame) + Send + Sync + 'static,
{
    fn on_frame(&self, session: &mut Responder<'_>, frame: &Frame) {
        (self.0)(session, frame)
    }
}

/// The active session as seen from inside an action.
pub struct Responder<'a> {
    out: &'a mut BytesMut,
    peer: Option<SocketAddr>,
    stop: bool,
}

impl<'a> Responder<'a> {
    pub(crate) fn new(out: &'a mut BytesMut, peer: Option<SocketAddr>) -> Self {
        Self {
            out,
            peer,
            stop: false,
        }
    }

    /// Queues `text` as one `0x00 <text> 0xFF` frame to the client.
    pub fn write(&mut self, text: &str) {
        tracing::trace!(len = text.len(), "queueing frame");
        encode_frame(text, self.out);
    }

    /// Ends the stream once the current frame has been dispatched.
    pub fn disconnect(&mut self) {
        self.stop = true;
    }

    /// Whether an action asked to end the stream.
    pub fn disconnect_requested(&self) -> bool {
        self.stop
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Fixed-capacity ordered list of actions.
pub struct ActionRegistry {
    actions: Vec<Box<dyn Action>>,
    capacity: usize,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACTION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            actions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `action` and returns its index.
    ///
    /// A full registry is left unchanged and reports
    /// [`ServerError::RegistryFull`]; nothing else is affected.
    pub fn register(&mut self, action: impl Action) -> Result<usize, ServerError> {
        if self.actions.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "action registry full, ignoring action");
            return Err(ServerError::RegistryFull {
                capacity: self.capacity,
            });
        }
        self.actions.push(Box::new(action));
        let index = self.actions.len() - 1;
        tracing::debug!(index, "action registered");
        Ok(index)
    }

    /// Registers a closure or free function.
    pub fn register_fn<F>(&mut self, f: F) -> Result<usize, ServerError>
    where
        F: Fn(&mut Responder<'_>, &Frame) + Send + Sync + 'static,
    {
        self.register(FnAction(f))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Runs every action on `frame`, in registration order.
    ///
    /// A panicking action is logged and skipped; the rest still run.
    /// Returns the number of actions that panicked.
    pub fn dispatch_all(&self, session: &mut Responder<'_>, frame: &Frame) -> usize {
        tracing::debug!(actions = self.actions.len(), len = frame.len(), "dispatching frame");
        let mut failed = 0;
        for (index, action) in self.actions.iter().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| action.on_frame(session, frame)));
            if result.is_err() {
                tracing::error!(index, "action panicked, continuing with next action");
                failed += 1;
            }
        }
        failed
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
