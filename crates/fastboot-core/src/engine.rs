//! The action queue engine.
//!
//! Callers build a queue through the `queue_*` API, then `execute` drains it
//! head to tail against a transport. Each action's reply handler decides the
//! walk's fate: it can accept, abort, or append follow-up work — the
//! compound-image flows chain themselves one sub-image at a time this way,
//! and translate the bootloader's pre-update restart into a disconnect wait,
//! a transport reopen and a retry of the same sub-image.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::compound::{CompoundError, CompoundSession, LargeZipState, MultiZipState};
use crate::events::{FlashEvent, FlashObserver, TracingObserver};
use crate::matcher::match_any;
use crate::protocol::constants::{MAX_COMMAND_SIZE, RESTART_SETTLE_INTERVAL};
use crate::protocol::reply::is_restart_request;
use crate::queue::{Action, ActionQueue, OnReply, Op, Payload};
use crate::sparse::SparseStream;
use crate::transport::{Transport, TransportFactory};
use crate::wire::{self, WireError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("command too long: {len} bytes (limit {limit})")]
    CommandTooLong { len: usize, limit: usize },

    #[error("payload too large for 32-bit download: {0} bytes")]
    PayloadTooLarge(u64),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Compound(#[from] CompoundError),

    #[error("requirement not met: device {variable} is '{actual}'")]
    RequirementMismatch {
        variable: String,
        actual: String,
        acceptable: Vec<String>,
        reject: bool,
    },

    #[error("no compound flash in progress")]
    NoCompoundSession,

    #[error("a compound flash is already in progress")]
    CompoundInProgress,

    #[error("action payload does not match its operation")]
    BadPayload,
}

enum ZipFlow {
    Multi,
    Large,
}

/// Builds and drains the action queue against one device.
pub struct Engine<'a, O: FlashObserver> {
    queue: ActionQueue<'a>,
    observer: Arc<O>,
    /// Product reported by the device, gating product-scoped requirements.
    product: Option<String>,
    /// Raised by reply handlers when the device will re-enumerate; consumed
    /// at the top of the next walk iteration.
    restart: bool,
    compound: Option<CompoundSession>,
    settle: Duration,
}

impl<'a> Engine<'a, TracingObserver> {
    /// Create an engine with the default tracing observer.
    pub fn new() -> Self {
        Self::with_observer(Arc::new(TracingObserver))
    }
}

impl<'a> Default for Engine<'a, TracingObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O: FlashObserver> Engine<'a, O> {
    /// Create an engine with a custom observer.
    pub fn with_observer(observer: Arc<O>) -> Self {
        Self {
            queue: ActionQueue::new(),
            observer,
            product: None,
            restart: false,
            compound: None,
            settle: RESTART_SETTLE_INTERVAL,
        }
    }

    pub fn set_product(&mut self, product: Option<String>) {
        self.product = product;
    }

    /// Override the settle time between a pre-update restart being announced
    /// and the transport-restart flag being raised.
    pub fn set_settle_interval(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// True while a compound flash still has sub-images to emit.
    pub fn compound_in_progress(&self) -> bool {
        self.compound.is_some()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action<'a>> {
        self.queue.iter()
    }

    /// Release all queued actions, walked and pending alike.
    pub fn reset(&mut self) {
        self.queue.reset();
    }

    // ------------------------------------------------------------------
    // Enqueue API
    // ------------------------------------------------------------------

    fn queue_action(&mut self, op: Op, cmd: String) -> Result<&mut Action<'a>, EngineError> {
        if cmd.len() >= MAX_COMMAND_SIZE {
            return Err(EngineError::CommandTooLong {
                len: cmd.len(),
                limit: MAX_COMMAND_SIZE,
            });
        }
        Ok(self.queue.push(Action::new(op, cmd)))
    }

    /// Upload `data`, then flash it to `partition`.
    pub fn queue_flash(&mut self, partition: &str, data: &'a [u8]) -> Result<(), EngineError> {
        let size = u32::try_from(data.len())
            .map_err(|_| EngineError::PayloadTooLarge(data.len() as u64))?;

        let action = self.queue_action(Op::Download, String::new())?;
        action.payload = Payload::Borrowed(data);
        action.message = Some(format!("sending '{partition}' ({} KB)", size / 1024));

        let action = self.queue_action(Op::Command, format!("flash:{partition}"))?;
        action.message = Some(format!("writing '{partition}'"));
        Ok(())
    }

    /// Upload one slice of a sparse image, then flash it to `partition`.
    pub fn queue_flash_sparse(
        &mut self,
        partition: &str,
        stream: Box<dyn SparseStream + 'a>,
        size: u32,
        current: usize,
        total: usize,
    ) -> Result<(), EngineError> {
        let action = self.queue_action(Op::DownloadSparse, String::new())?;
        action.payload = Payload::Sparse(stream);
        action.message = Some(format!(
            "sending sparse '{partition}' {current}/{total} ({} KB)",
            size / 1024
        ));

        let action = self.queue_action(Op::Command, format!("flash:{partition}"))?;
        action.message = Some(format!("writing '{partition}' {current}/{total}"));
        Ok(())
    }

    pub fn queue_erase(&mut self, partition: &str) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Command, format!("erase:{partition}"))?;
        action.message = Some(format!("erasing '{partition}'"));
        Ok(())
    }

    pub fn queue_set_active(&mut self, slot: &str) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Command, format!("set_active:{slot}"))?;
        action.message = Some(format!("Setting current slot to '{slot}'"));
        Ok(())
    }

    pub fn queue_reboot(&mut self) {
        let action = self.queue.push(Action::new(Op::Command, "reboot".into()));
        action.message = Some("rebooting".into());
        action.on_reply = OnReply::Nothing;
    }

    /// Queue a raw command with a display message.
    pub fn queue_command(&mut self, cmd: &str, message: &str) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Command, cmd.to_string())?;
        action.message = Some(message.to_string());
        Ok(())
    }

    /// Upload `data` without flashing it anywhere.
    pub fn queue_download(&mut self, name: &str, data: &'a [u8]) -> Result<(), EngineError> {
        u32::try_from(data.len()).map_err(|_| EngineError::PayloadTooLarge(data.len() as u64))?;
        let action = self.queue_action(Op::Download, String::new())?;
        action.payload = Payload::Borrowed(data);
        action.message = Some(format!("downloading '{name}'"));
        Ok(())
    }

    pub fn queue_notice(&mut self, text: &str) {
        let action = self.queue.push(Action::new(Op::Notice, String::new()));
        action.payload = Payload::Notice(text.to_string());
    }

    pub fn queue_wait_for_disconnect(&mut self) {
        self.queue
            .push(Action::new(Op::WaitForDisconnect, String::new()));
    }

    /// Queue a getvar assertion. When `product` is set, the check only
    /// applies on that product and reports IGNORE elsewhere. `invert` turns
    /// the requirement into a rejection.
    pub fn queue_require(
        &mut self,
        product: Option<&str>,
        var: &str,
        invert: bool,
        values: &[&str],
    ) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Query, format!("getvar:{var}"))?;
        action.product_scope = product.map(str::to_string);
        action.message = Some(format!("checking {var}"));
        action.on_reply = OnReply::Require {
            values: values.iter().map(|v| v.to_string()).collect(),
            invert,
        };
        Ok(())
    }

    /// Queue a getvar whose value is reported as `label: value`.
    pub fn queue_display(&mut self, var: &str, label: &str) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Query, format!("getvar:{var}"))?;
        action.on_reply = OnReply::Display {
            label: label.to_string(),
        };
        Ok(())
    }

    /// Queue a getvar whose value is copied into `dest`, bounded by
    /// `max_len` bytes.
    pub fn queue_query_save(
        &mut self,
        var: &str,
        dest: Arc<Mutex<String>>,
        max_len: usize,
    ) -> Result<(), EngineError> {
        let action = self.queue_action(Op::Query, format!("getvar:{var}"))?;
        action.on_reply = OnReply::Save { dest, max_len };
        Ok(())
    }

    /// Open a multi-zip container and queue its first sub-image. Each
    /// successful flash chains the next one.
    pub fn queue_flash_multizip(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.compound.is_some() {
            return Err(EngineError::CompoundInProgress);
        }
        self.compound = Some(CompoundSession::MultiZip(MultiZipState::open(path)?));
        self.advance_multizip()
    }

    /// Open a large-zip container and queue its first sub-image. Each
    /// successful flash chains the next one.
    pub fn queue_flash_largezip(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.compound.is_some() {
            return Err(EngineError::CompoundInProgress);
        }
        self.compound = Some(CompoundSession::LargeZip(LargeZipState::open(path)?));
        self.advance_largezip()
    }

    fn advance_multizip(&mut self) -> Result<(), EngineError> {
        let Some(CompoundSession::MultiZip(state)) = self.compound.as_mut() else {
            return Err(EngineError::NoCompoundSession);
        };
        match state.next_entry()? {
            Some((name, data)) => self.queue_flash_zip(&name, data, OnReply::MultiZipCheck),
            None => {
                info!("multi-zip container exhausted");
                self.compound = None;
                Ok(())
            }
        }
    }

    fn advance_largezip(&mut self) -> Result<(), EngineError> {
        let Some(CompoundSession::LargeZip(state)) = self.compound.as_mut() else {
            return Err(EngineError::NoCompoundSession);
        };
        match state.next_subimage()? {
            Some((name, data)) => self.queue_flash_zip(&name, data, OnReply::LargeZipCheck),
            None => {
                info!("large-zip container exhausted");
                self.compound = None;
                Ok(())
            }
        }
    }

    fn queue_flash_zip(
        &mut self,
        name: &str,
        data: Arc<[u8]>,
        on_reply: OnReply,
    ) -> Result<(), EngineError> {
        let size = data.len();
        let action = self.queue_action(Op::Download, String::new())?;
        action.payload = Payload::Owned(data);
        action.message = Some(format!("sending '{name}' ({} KB)", size / 1024));

        let action = self.queue_action(Op::Command, "flash:zip".into())?;
        action.message = Some(format!("writing '{name}'"));
        action.on_reply = on_reply;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Drain the queue head to tail against `transport`.
    ///
    /// The first handler error aborts the walk; actions past it are never
    /// dispatched. The total elapsed time is reported either way. When a
    /// handler raised the restart flag, `factory` supplies the replacement
    /// transport.
    pub fn execute(
        &mut self,
        transport: Box<dyn Transport>,
        factory: &mut dyn TransportFactory,
    ) -> Result<(), EngineError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let walk_start = Instant::now();
        let result = self.walk(transport, factory);
        self.observer.on_event(&FlashEvent::QueueFinished {
            elapsed: walk_start.elapsed(),
        });
        result
    }

    fn walk(
        &mut self,
        mut transport: Box<dyn Transport>,
        factory: &mut dyn TransportFactory,
    ) -> Result<(), EngineError> {
        let mut index = 0;
        while index < self.queue.len() {
            if self.restart {
                debug!("transport restart requested, reopening device");
                self.observer.on_event(&FlashEvent::TransportRestarted);
                transport = factory.reopen().map_err(WireError::from)?;
                self.restart = false;
            }

            let reply = {
                let Some(action) = self.queue.get_mut(index) else {
                    break;
                };
                action.started = Some(Instant::now());
                if let Some(message) = &action.message {
                    self.observer.on_event(&FlashEvent::ActionStarted {
                        message: message.clone(),
                    });
                }
                match action.op {
                    Op::Download => {
                        let bytes: &[u8] = match &action.payload {
                            Payload::Borrowed(b) => b,
                            Payload::Owned(o) => o.as_ref(),
                            _ => return Err(EngineError::BadPayload),
                        };
                        Some(wire::send_data(
                            transport.as_mut(),
                            bytes,
                            self.observer.as_ref(),
                        ))
                    }
                    Op::Command | Op::Query => Some(wire::send_command(
                        transport.as_mut(),
                        &action.cmd,
                        self.observer.as_ref(),
                    )),
                    Op::DownloadSparse => {
                        let Payload::Sparse(stream) = &mut action.payload else {
                            return Err(EngineError::BadPayload);
                        };
                        Some(wire::send_sparse(
                            transport.as_mut(),
                            stream.as_mut(),
                            self.observer.as_ref(),
                        ))
                    }
                    Op::Notice => {
                        if let Payload::Notice(text) = &action.payload {
                            self.observer
                                .on_event(&FlashEvent::Notice { text: text.clone() });
                        }
                        None
                    }
                    Op::WaitForDisconnect => {
                        transport.wait_for_disconnect().map_err(WireError::from)?;
                        None
                    }
                }
            };

            if let Some(reply) = reply {
                self.handle_reply(index, reply)?;
            }
            index += 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reply handlers
    // ------------------------------------------------------------------

    fn handle_reply(
        &mut self,
        index: usize,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        let Some(action) = self.queue.get_mut(index) else {
            return Ok(());
        };
        let on_reply = std::mem::take(&mut action.on_reply);
        let cmd = action.cmd.clone();
        let scope = action.product_scope.clone();
        let started = action.started.unwrap_or_else(Instant::now);

        match on_reply {
            OnReply::Default => self.on_default(started, reply),
            OnReply::Nothing => Ok(()),
            OnReply::Require { values, invert } => {
                self.on_require(&cmd, scope, started, values, invert, reply)
            }
            OnReply::Display { label } => self.on_display(&cmd, &label, reply),
            OnReply::Save { dest, max_len } => self.on_save(&cmd, &dest, max_len, reply),
            OnReply::MultiZipCheck => self.on_zip_check(started, ZipFlow::Multi, reply),
            OnReply::LargeZipCheck => self.on_zip_check(started, ZipFlow::Large, reply),
        }
    }

    fn on_default(
        &mut self,
        started: Instant,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        match reply {
            Ok(_) => {
                self.observer.on_event(&FlashEvent::ActionOkay {
                    elapsed: started.elapsed(),
                });
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(&FlashEvent::ActionFailed {
                    reason: e.reason(),
                });
                Err(e.into())
            }
        }
    }

    fn on_require(
        &mut self,
        cmd: &str,
        scope: Option<String>,
        started: Instant,
        values: Vec<String>,
        invert: bool,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        let resp = match reply {
            Ok(resp) => resp,
            Err(e) => {
                self.observer.on_event(&FlashEvent::ActionFailed {
                    reason: e.reason(),
                });
                return Err(e.into());
            }
        };

        if let Some(required) = scope {
            let current = self.product.as_deref().unwrap_or("");
            if required != current {
                self.observer.on_event(&FlashEvent::ActionIgnored {
                    product: current.to_string(),
                    required,
                    elapsed: started.elapsed(),
                });
                return Ok(());
            }
        }

        let mut holds = match_any(&resp, &values);
        if invert {
            holds = !holds;
        }
        if holds {
            self.observer.on_event(&FlashEvent::ActionOkay {
                elapsed: started.elapsed(),
            });
            return Ok(());
        }

        let variable = cmd.strip_prefix("getvar:").unwrap_or(cmd).to_string();
        self.observer.on_event(&FlashEvent::RequirementMismatch {
            variable: variable.clone(),
            actual: resp.clone(),
            acceptable: values.clone(),
            reject: invert,
        });
        Err(EngineError::RequirementMismatch {
            variable,
            actual: resp,
            acceptable: values,
            reject: invert,
        })
    }

    fn on_display(
        &mut self,
        cmd: &str,
        label: &str,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        match reply {
            Ok(value) => {
                self.observer.on_event(&FlashEvent::VarDisplayed {
                    label: label.to_string(),
                    value,
                });
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(&FlashEvent::ActionFailed {
                    reason: format!("{cmd} ({})", e.reason()),
                });
                Err(e.into())
            }
        }
    }

    fn on_save(
        &mut self,
        cmd: &str,
        dest: &Mutex<String>,
        max_len: usize,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        match reply {
            Ok(value) => {
                *dest.lock().unwrap() = truncate_on_char_boundary(value, max_len);
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(&FlashEvent::ActionFailed {
                    reason: format!("{cmd} ({})", e.reason()),
                });
                Err(e.into())
            }
        }
    }

    /// Verdict on one compound sub-image: advance on success, retry the same
    /// sub-image across a transport restart when the bootloader asks for it,
    /// abort otherwise.
    fn on_zip_check(
        &mut self,
        started: Instant,
        flow: ZipFlow,
        reply: Result<String, WireError>,
    ) -> Result<(), EngineError> {
        match reply {
            Ok(_) => {
                self.observer.on_event(&FlashEvent::ActionOkay {
                    elapsed: started.elapsed(),
                });
                if let Some(session) = self.compound.as_mut() {
                    session.advance_index();
                }
                self.advance_flow(flow)
            }
            Err(WireError::Remote(reason)) if is_restart_request(&reason) => {
                debug!("bootloader requested pre-update restart, flashing again");
                self.queue_wait_for_disconnect();
                thread::sleep(self.settle);
                self.restart = true;
                self.advance_flow(flow)
            }
            Err(e) => {
                self.observer.on_event(&FlashEvent::ActionFailed {
                    reason: e.reason(),
                });
                Err(e.into())
            }
        }
    }

    fn advance_flow(&mut self, flow: ZipFlow) -> Result<(), EngineError> {
        match flow {
            ZipFlow::Multi => self.advance_multizip(),
            ZipFlow::Large => self.advance_largezip(),
        }
    }
}

fn truncate_on_char_boundary(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::compound::LargeZipHeader;
    use crate::protocol::constants::{LARGEZIP_MAGIC, LARGEZIP_MAX_SUBIMAGES};
    use crate::sparse::BufferChunks;
    use crate::transport::{ScriptedFactory, ScriptedTransport};

    #[derive(Default)]
    struct Collector(Mutex<Vec<FlashEvent>>);

    impl Collector {
        fn events(&self) -> Vec<FlashEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl FlashObserver for Collector {
        fn on_event(&self, event: &FlashEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn test_engine<'a>() -> (Engine<'a, Collector>, Arc<Collector>) {
        let collector = Arc::new(Collector::default());
        let mut engine = Engine::with_observer(collector.clone());
        engine.set_settle_interval(Duration::ZERO);
        (engine, collector)
    }

    fn run(
        engine: &mut Engine<'_, Collector>,
        transport: &ScriptedTransport,
    ) -> Result<(), EngineError> {
        let mut factory = ScriptedFactory::default();
        engine.execute(Box::new(transport.clone()), &mut factory)
    }

    #[test]
    fn test_reboot_sends_one_command() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAY");

        engine.queue_reboot();
        run(&mut engine, &t).unwrap();

        assert_eq!(t.commands(), vec!["reboot"]);
    }

    #[test]
    fn test_fifo_dispatch_order() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");

        engine.queue_erase("cache").unwrap();
        engine.queue_erase("userdata").unwrap();
        engine.queue_reboot();
        run(&mut engine, &t).unwrap();

        assert_eq!(
            t.commands(),
            vec!["erase:cache", "erase:userdata", "reboot"]
        );
    }

    #[test]
    fn test_flash_downloads_then_flashes() {
        let buf = vec![0xA5u8; 0x1000];
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"DATA00001000");
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");

        engine.queue_flash("boot", &buf).unwrap();
        run(&mut engine, &t).unwrap();

        assert_eq!(t.commands(), vec!["download:00001000", "flash:boot"]);
        assert_eq!(t.writes().len(), 3);
    }

    #[test]
    fn test_flash_sparse_streams_payload() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"DATA00000400");
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");

        let stream = BufferChunks::new(vec![0xA5u8; 1024], 256);
        engine
            .queue_flash_sparse("system", Box::new(stream), 1024, 1, 2)
            .unwrap();
        run(&mut engine, &t).unwrap();

        assert_eq!(t.commands(), vec!["download:00000400", "flash:system"]);
    }

    #[test]
    fn test_require_accepts_matching_product() {
        let (mut engine, events) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYangler");

        engine.set_product(Some("angler".into()));
        engine
            .queue_require(Some("angler"), "product", false, &["angler", "bullhead"])
            .unwrap();
        run(&mut engine, &t).unwrap();

        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, FlashEvent::ActionOkay { .. })));
    }

    #[test]
    fn test_require_mismatch_aborts_walk() {
        let (mut engine, events) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYfoo");

        engine.set_product(Some("angler".into()));
        engine
            .queue_require(Some("angler"), "product", false, &["angler", "bullhead"])
            .unwrap();
        engine.queue_reboot();

        let err = run(&mut engine, &t).unwrap_err();
        let EngineError::RequirementMismatch {
            variable,
            actual,
            acceptable,
            reject,
        } = err
        else {
            panic!("expected requirement mismatch");
        };
        assert_eq!(variable, "product");
        assert_eq!(actual, "foo");
        assert_eq!(acceptable, vec!["angler", "bullhead"]);
        assert!(!reject);

        // Abort-on-fail: the reboot was never dispatched.
        assert_eq!(t.commands(), vec!["getvar:product"]);
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, FlashEvent::RequirementMismatch { .. })));
    }

    #[test]
    fn test_reject_inverts_the_verdict() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYfoo");

        engine.queue_require(None, "secure", true, &["foo"]).unwrap();
        assert!(matches!(
            run(&mut engine, &t),
            Err(EngineError::RequirementMismatch { reject: true, .. })
        ));

        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYbar");
        engine.queue_require(None, "secure", true, &["foo"]).unwrap();
        run(&mut engine, &t).unwrap();
    }

    #[test]
    fn test_product_scope_skips_check_elsewhere() {
        let (mut engine, events) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYwhatever");
        t.push_reply(b"OKAY");

        engine.set_product(Some("bullhead".into()));
        engine
            .queue_require(Some("angler"), "version-main", false, &["1.00"])
            .unwrap();
        engine.queue_erase("cache").unwrap();
        run(&mut engine, &t).unwrap();

        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, FlashEvent::ActionIgnored { .. })));
        assert_eq!(t.commands(), vec!["getvar:version-main", "erase:cache"]);
    }

    #[test]
    fn test_wildcard_requirement() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAY1.04.0000");

        engine
            .queue_require(None, "version-main", false, &["1.04*", "1.05*"])
            .unwrap();
        run(&mut engine, &t).unwrap();
    }

    #[test]
    fn test_display_reports_value() {
        let (mut engine, events) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAY1.04");

        engine.queue_display("version", "Bootloader version").unwrap();
        run(&mut engine, &t).unwrap();

        assert!(events.events().iter().any(|e| matches!(
            e,
            FlashEvent::VarDisplayed { label, value }
                if label == "Bootloader version" && value == "1.04"
        )));
    }

    #[test]
    fn test_query_save_bounds_destination() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();
        t.push_reply(b"OKAYserialno123");

        let dest = Arc::new(Mutex::new(String::new()));
        engine.queue_query_save("serialno", dest.clone(), 6).unwrap();
        run(&mut engine, &t).unwrap();

        assert_eq!(*dest.lock().unwrap(), "serial");
    }

    #[test]
    fn test_notice_needs_no_transport() {
        let (mut engine, events) = test_engine();
        let t = ScriptedTransport::new();

        engine.queue_notice("about to flash");
        run(&mut engine, &t).unwrap();

        assert!(t.writes().is_empty());
        assert!(events.events().iter().any(
            |e| matches!(e, FlashEvent::Notice { text } if text == "about to flash")
        ));
    }

    #[test]
    fn test_wait_for_disconnect_blocks_on_transport() {
        let (mut engine, _) = test_engine();
        let t = ScriptedTransport::new();

        engine.queue_wait_for_disconnect();
        run(&mut engine, &t).unwrap();

        assert_eq!(t.disconnect_waits(), 1);
    }

    #[test]
    fn test_oversized_command_rejected_at_enqueue() {
        let (mut engine, _) = test_engine();
        let long = "x".repeat(80);

        let err = engine.queue_command(&long, "trying").unwrap_err();
        assert!(matches!(
            err,
            EngineError::CommandTooLong { len: 80, limit: 64 }
        ));
        let text = err.to_string();
        assert!(text.contains("80"));
        assert!(text.contains("64"));
        assert_eq!(engine.actions().count(), 0);
    }

    // ------------------------------------------------------------------
    // Compound flows
    // ------------------------------------------------------------------

    fn build_multizip(entries: &[&[u8]]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (i, data) in entries.iter().enumerate() {
            writer.start_file(format!("zip_{i}.zip"), options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    fn build_largezip(subimages: &[&[u8]]) -> tempfile::NamedTempFile {
        let mut starts = [0u32; LARGEZIP_MAX_SUBIMAGES];
        let mut lengths = [0i32; LARGEZIP_MAX_SUBIMAGES];
        let mut offset = LargeZipHeader::SIZE as u32;
        for (i, data) in subimages.iter().enumerate() {
            starts[i] = offset;
            lengths[i] = data.len() as i32;
            offset += data.len() as u32;
        }

        let mut contents = Vec::from(&LARGEZIP_MAGIC[..]);
        for start in starts {
            contents.extend_from_slice(&start.to_le_bytes());
        }
        for length in lengths {
            contents.extend_from_slice(&length.to_le_bytes());
        }
        for data in subimages {
            contents.extend_from_slice(data);
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&contents).unwrap();
        file
    }

    #[test]
    fn test_multizip_chains_every_entry() {
        let (mut engine, _) = test_engine();
        let container = build_multizip(&[b"PK\x03\x04first", b"PK\x03\x04second"]);

        let t = ScriptedTransport::new();
        t.push_reply(b"DATA00000009");
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");
        t.push_reply(b"DATA0000000a");
        t.push_reply(b"OKAY");
        t.push_reply(b"OKAY");

        engine.queue_flash_multizip(container.path()).unwrap();
        assert!(engine.compound_in_progress());
        run(&mut engine, &t).unwrap();

        assert_eq!(
            t.commands(),
            vec![
                "download:00000009",
                "flash:zip",
                "download:0000000a",
                "flash:zip"
            ]
        );
        assert!(!engine.compound_in_progress());
    }

    #[test]
    fn test_largezip_restart_retries_same_subimage() {
        let (mut engine, events) = test_engine();
        let container = build_largezip(&[&[0xA5u8; 1024], &[0x5Au8; 1024]]);

        // First flash of sub-image 0 fails with the pre-update restart.
        let first = ScriptedTransport::new();
        first.push_reply(b"DATA00000400");
        first.push_reply(b"OKAY");
        first.push_reply(b"FAILhboot pre-update in progress");

        // After reopen: sub-image 0 again, then sub-image 1.
        let second = ScriptedTransport::new();
        for _ in 0..2 {
            second.push_reply(b"DATA00000400");
            second.push_reply(b"OKAY");
            second.push_reply(b"OKAY");
        }

        let mut factory = ScriptedFactory::new(vec![second.clone()]);

        engine.queue_flash_largezip(container.path()).unwrap();
        engine
            .execute(Box::new(first.clone()), &mut factory)
            .unwrap();

        assert_eq!(first.commands(), vec!["download:00000400", "flash:zip"]);
        assert_eq!(
            second.commands(),
            vec![
                "download:00000400",
                "flash:zip",
                "download:00000400",
                "flash:zip"
            ]
        );
        assert_eq!(factory.reopens(), 1);
        assert_eq!(first.disconnect_waits() + second.disconnect_waits(), 1);
        assert!(!engine.compound_in_progress());
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, FlashEvent::TransportRestarted)));
    }

    #[test]
    fn test_largezip_unrelated_failure_aborts() {
        let (mut engine, _) = test_engine();
        let container = build_largezip(&[&[0xA5u8; 512]]);

        let t = ScriptedTransport::new();
        t.push_reply(b"DATA00000200");
        t.push_reply(b"OKAY");
        t.push_reply(b"FAILflash write failure");

        engine.queue_flash_largezip(container.path()).unwrap();
        let err = run(&mut engine, &t).unwrap_err();
        assert!(matches!(err, EngineError::Wire(WireError::Remote(_))));
    }

    #[test]
    fn test_second_compound_flash_rejected() {
        let (mut engine, _) = test_engine();
        let container = build_multizip(&[b"payload"]);

        engine.queue_flash_multizip(container.path()).unwrap();
        assert!(matches!(
            engine.queue_flash_multizip(container.path()),
            Err(EngineError::CompoundInProgress)
        ));
    }
}
