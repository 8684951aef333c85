//! fastboot-core: a fastboot protocol client engine in Rust.
//!
//! This crate drives a bootloader through the fastboot request/response
//! protocol over USB bulk transport: query variables, upload payloads,
//! flash partitions, reboot, switch slots. On top of the base protocol it
//! implements two compound-image flows (a multi-zip and a large-zip
//! container) and the mid-flash disconnect/reconnect recovery the
//! bootloader requests with its pre-update FAIL reply.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Frame constants and reply parsing
//! - **Transport**: USB communication abstraction (nusb, scripted)
//! - **Wire**: Command / download / sparse-download framing
//! - **Queue**: Typed deferred actions with reply handlers
//! - **Compound**: Multi-zip and large-zip sub-image iteration
//! - **Engine**: Queue construction API and the execution walk
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fastboot_core::{Engine, UsbFactory};
//! use fastboot_core::transport::TransportFactory;
//!
//! let mut factory = UsbFactory::new(Duration::from_secs(60));
//! let transport = factory.reopen().expect("no device");
//!
//! let mut engine = Engine::new();
//! engine.queue_erase("cache").expect("enqueue");
//! engine.queue_reboot();
//! engine.execute(transport, &mut factory).expect("flash failed");
//! ```

pub mod compound;
pub mod engine;
pub mod events;
pub mod matcher;
pub mod protocol;
pub mod queue;
pub mod sparse;
pub mod transport;
pub mod wire;

// Re-exports for convenience
pub use compound::{CompoundError, CompoundSession, LargeZipHeader, LargeZipState, MultiZipState};
pub use engine::{Engine, EngineError};
pub use events::{FlashEvent, FlashObserver, NullObserver, TracingObserver};
pub use protocol::{Reply, ReplyError};
pub use queue::{Action, ActionQueue, OnReply, Op, Payload};
pub use sparse::{BufferChunks, SparseStream};
pub use transport::{
    ScriptedFactory, ScriptedTransport, Transport, TransportError, TransportFactory, UsbFactory,
    UsbTransport,
};
pub use wire::WireError;
