//! Wire codec - request/response framing against a transport.
//!
//! Three primitives: `send_command` (command, read to a terminal reply),
//! `send_data` (announce a bulk download, stream it, read the verdict) and
//! `send_sparse` (same, payload produced lazily). INFO replies never
//! terminate; they are surfaced to the observer and reading continues.

use thiserror::Error;
use tracing::{debug, trace};

use crate::events::{FlashEvent, FlashObserver};
use crate::protocol::constants::{MAX_COMMAND_SIZE, MAX_DOWNLOAD_SIZE, MAX_REPLY_SIZE};
use crate::protocol::reply::{Reply, ReplyError};
use crate::sparse::SparseStream;
use crate::transport::{Transport, TransportError};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("command too long: {len} bytes (limit {limit})")]
    CommandTooLong { len: usize, limit: usize },

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("remote: {0}")]
    Remote(String),

    #[error("{0}")]
    Reply(#[from] ReplyError),

    #[error("unexpected {0} reply")]
    Unexpected(&'static str),

    #[error("payload too large for 32-bit download: {0} bytes")]
    Oversized(u64),

    #[error("device acknowledged {accepted:#010x} bytes, announced {announced:#010x}")]
    DataSizeMismatch { announced: u32, accepted: u32 },

    #[error("sparse stream produced {produced} bytes, announced {announced}")]
    SparseSizeMismatch { announced: u64, produced: u64 },

    #[error("sparse read: {0}")]
    SparseRead(#[source] std::io::Error),
}

impl WireError {
    /// The text a reply handler reports: the device's own reason for a
    /// remote failure, the error description otherwise.
    pub fn reason(&self) -> String {
        match self {
            WireError::Remote(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

fn write_command(transport: &mut dyn Transport, cmd: &str) -> Result<(), WireError> {
    if cmd.len() >= MAX_COMMAND_SIZE {
        return Err(WireError::CommandTooLong {
            len: cmd.len(),
            limit: MAX_COMMAND_SIZE,
        });
    }
    debug!(%cmd, "sending command");
    transport.write(cmd.as_bytes())?;
    Ok(())
}

/// Read replies until a terminal one arrives, surfacing INFO lines.
fn next_reply<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    observer: &O,
) -> Result<Reply, WireError> {
    loop {
        let frame = transport.read(MAX_REPLY_SIZE)?;
        trace!(len = frame.len(), "reply frame");
        match Reply::parse(&frame)? {
            Reply::Info(text) => {
                observer.on_event(&FlashEvent::BootloaderInfo { text });
            }
            reply => return Ok(reply),
        }
    }
}

/// Send an ASCII command and read its terminal reply.
///
/// `Ok` carries the OKAY payload text; a FAIL reply becomes
/// [`WireError::Remote`] with the device's reason.
pub fn send_command<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    cmd: &str,
    observer: &O,
) -> Result<String, WireError> {
    write_command(transport, cmd)?;
    match next_reply(transport, observer)? {
        Reply::Okay(payload) => Ok(payload),
        Reply::Fail(reason) => Err(WireError::Remote(reason)),
        Reply::Data(_) => Err(WireError::Unexpected("DATA")),
        Reply::Info(_) => Err(WireError::Unexpected("INFO")),
    }
}

/// Query a single bootloader variable.
pub fn getvar<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    var: &str,
    observer: &O,
) -> Result<String, WireError> {
    send_command(transport, &format!("getvar:{var}"), observer)
}

fn start_download<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    announced: u32,
    observer: &O,
) -> Result<(), WireError> {
    write_command(transport, &format!("download:{announced:08x}"))?;
    match next_reply(transport, observer)? {
        Reply::Data(accepted) if accepted == announced => Ok(()),
        Reply::Data(accepted) => Err(WireError::DataSizeMismatch {
            announced,
            accepted,
        }),
        Reply::Fail(reason) => Err(WireError::Remote(reason)),
        Reply::Okay(_) => Err(WireError::Unexpected("OKAY")),
        Reply::Info(_) => Err(WireError::Unexpected("INFO")),
    }
}

fn finish_download<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    observer: &O,
) -> Result<String, WireError> {
    match next_reply(transport, observer)? {
        Reply::Okay(payload) => Ok(payload),
        Reply::Fail(reason) => Err(WireError::Remote(reason)),
        Reply::Data(_) => Err(WireError::Unexpected("DATA")),
        Reply::Info(_) => Err(WireError::Unexpected("INFO")),
    }
}

/// Announce and stream a bulk download, then read the verdict.
pub fn send_data<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    data: &[u8],
    observer: &O,
) -> Result<String, WireError> {
    let announced =
        u32::try_from(data.len()).map_err(|_| WireError::Oversized(data.len() as u64))?;
    start_download(transport, announced, observer)?;
    transport.write(data)?;
    finish_download(transport, observer)
}

/// As [`send_data`], with the payload produced lazily by a sparse stream.
pub fn send_sparse<O: FlashObserver + ?Sized>(
    transport: &mut dyn Transport,
    stream: &mut dyn SparseStream,
    observer: &O,
) -> Result<String, WireError> {
    let total = stream.total_len();
    if total > MAX_DOWNLOAD_SIZE {
        return Err(WireError::Oversized(total));
    }
    let announced = total as u32;
    start_download(transport, announced, observer)?;

    let mut produced = 0u64;
    while let Some(chunk) = stream.next_chunk().map_err(WireError::SparseRead)? {
        transport.write(chunk)?;
        produced += chunk.len() as u64;
    }
    if produced != total {
        return Err(WireError::SparseSizeMismatch {
            announced: total,
            produced,
        });
    }
    finish_download(transport, observer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::events::FlashEvent;
    use crate::sparse::BufferChunks;
    use crate::transport::ScriptedTransport;

    #[derive(Default)]
    struct Collector(Mutex<Vec<FlashEvent>>);

    impl FlashObserver for Collector {
        fn on_event(&self, event: &FlashEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_command_okay_payload() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"OKAYangler");

        let resp = send_command(&mut t, "getvar:product", &Collector::default()).unwrap();
        assert_eq!(resp, "angler");
        assert_eq!(t.commands(), vec!["getvar:product"]);
    }

    #[test]
    fn test_command_fail_carries_reason() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"FAILunknown command");

        let err = send_command(&mut t, "frob", &Collector::default()).unwrap_err();
        assert!(matches!(&err, WireError::Remote(r) if r == "unknown command"));
        assert_eq!(err.reason(), "unknown command");
    }

    #[test]
    fn test_info_lines_do_not_terminate() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"INFOerasing userdata");
        t.push_reply(b"INFOstill going");
        t.push_reply(b"OKAY");

        let collector = Collector::default();
        send_command(&mut t, "erase:userdata", &collector).unwrap();

        let infos: Vec<_> = collector
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, FlashEvent::BootloaderInfo { .. }))
            .cloned()
            .collect();
        assert_eq!(infos.len(), 2);
    }

    #[test]
    fn test_command_length_limit() {
        let mut t = ScriptedTransport::new();
        let cmd = "x".repeat(64);
        let err = send_command(&mut t, &cmd, &Collector::default()).unwrap_err();
        assert!(matches!(
            err,
            WireError::CommandTooLong { len: 64, limit: 64 }
        ));
        assert!(t.writes().is_empty());
    }

    #[test]
    fn test_send_data_announces_then_streams() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"DATA00001000");
        t.push_reply(b"OKAY");

        let payload = vec![0xA5u8; 0x1000];
        send_data(&mut t, &payload, &Collector::default()).unwrap();

        let writes = t.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"download:00001000");
        assert_eq!(writes[1].len(), 0x1000);
    }

    #[test]
    fn test_send_data_size_mismatch() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"DATA00000800");

        let payload = vec![0u8; 0x1000];
        let err = send_data(&mut t, &payload, &Collector::default()).unwrap_err();
        assert!(matches!(
            err,
            WireError::DataSizeMismatch {
                announced: 0x1000,
                accepted: 0x800
            }
        ));
    }

    #[test]
    fn test_send_sparse_streams_chunks() {
        let mut t = ScriptedTransport::new();
        t.push_reply(b"DATA00000190");
        t.push_reply(b"OKAY");

        let mut stream = BufferChunks::new(vec![0xA5u8; 400], 128);
        send_sparse(&mut t, &mut stream, &Collector::default()).unwrap();

        let writes = t.writes();
        assert_eq!(writes[0], b"download:00000190");
        assert_eq!(writes.len(), 1 + 4);
        assert_eq!(writes[1..].iter().map(Vec::len).sum::<usize>(), 400);
    }
}
