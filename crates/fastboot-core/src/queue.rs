//! The deferred action queue.
//!
//! An [`Action`] is one unit of work against the device; the queue is an
//! append-only FIFO walked by the engine. Entries pushed while the walk is
//! in progress land after the current tail and are visited in order.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::sparse::SparseStream;

/// Operation an action performs when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Stream a binary payload via the download primitive.
    Download,
    /// Transmit `cmd` and accept the terminal reply.
    Command,
    /// Transmit `cmd` and hand the reply text to the handler.
    Query,
    /// Emit a notice; no transport I/O.
    Notice,
    /// Stream a lazily produced sparse payload.
    DownloadSparse,
    /// Block until the device leaves the bus.
    WaitForDisconnect,
}

/// Payload attached to an action.
///
/// The sum type makes ownership explicit: `Borrowed` buffers stay alive in
/// the caller for the duration of the walk, `Owned` buffers are shared with
/// the compound-image session that produced them.
pub enum Payload<'a> {
    None,
    Borrowed(&'a [u8]),
    Owned(Arc<[u8]>),
    Sparse(Box<dyn SparseStream + 'a>),
    Notice(String),
}

impl fmt::Debug for Payload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Borrowed(b) => write!(f, "Borrowed({} bytes)", b.len()),
            Payload::Owned(b) => write!(f, "Owned({} bytes)", b.len()),
            Payload::Sparse(s) => write!(f, "Sparse({} bytes)", s.total_len()),
            Payload::Notice(text) => write!(f, "Notice({text:?})"),
        }
    }
}

/// Reply handling attached to an action.
///
/// A closed set: the engine dispatches on the variant with full access to
/// the walk context, which is how handlers append follow-up actions and
/// raise the transport-restart flag.
#[derive(Debug, Default)]
pub enum OnReply {
    /// Report OKAY with the elapsed split, or FAILED with the reason.
    #[default]
    Default,
    /// Ignore the outcome entirely (reboot may drop the link mid-reply).
    Nothing,
    /// Match the reply against `values`; `invert` turns require into reject.
    Require { values: Vec<String>, invert: bool },
    /// Report the reply as `label: value`.
    Display { label: String },
    /// Copy up to `max_len` bytes of the reply into `dest`.
    Save {
        dest: Arc<Mutex<String>>,
        max_len: usize,
    },
    /// Multi-zip sub-image verdict: advance, retry, or abort.
    MultiZipCheck,
    /// Large-zip sub-image verdict: advance, retry, or abort.
    LargeZipCheck,
}

/// One queued unit of work.
#[derive(Debug)]
pub struct Action<'a> {
    pub op: Op,
    /// Literal command to transmit; empty for download/notice/wait ops.
    pub cmd: String,
    pub payload: Payload<'a>,
    /// Product gate: when set and different from the current product, the
    /// action reports IGNORE and succeeds.
    pub product_scope: Option<String>,
    /// Human-readable description reported before dispatch.
    pub message: Option<String>,
    pub on_reply: OnReply,
    /// Stamped when dispatch begins.
    pub started: Option<Instant>,
}

impl<'a> Action<'a> {
    pub fn new(op: Op, cmd: String) -> Self {
        Self {
            op,
            cmd,
            payload: Payload::None,
            product_scope: None,
            message: None,
            on_reply: OnReply::Default,
            started: None,
        }
    }
}

/// Append-only FIFO of actions.
#[derive(Debug, Default)]
pub struct ActionQueue<'a> {
    actions: Vec<Action<'a>>,
}

impl<'a> ActionQueue<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action<'a>) -> &mut Action<'a> {
        let index = self.actions.len();
        self.actions.push(action);
        &mut self.actions[index]
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Action<'a>> {
        self.actions.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action<'a>> {
        self.actions.iter()
    }

    /// Release every entry; walked and pending alike.
    pub fn reset(&mut self) {
        self.actions.clear();
    }
}
