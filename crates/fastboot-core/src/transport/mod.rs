//! Transport module - USB communication abstraction.

pub mod mock;
pub mod traits;
pub mod usb;

pub use mock::{ScriptedFactory, ScriptedTransport};
pub use traits::{Transport, TransportError, TransportFactory};
pub use usb::{UsbFactory, UsbTransport};
