//! Protocol module - fastboot wire protocol definitions.

pub mod constants;
pub mod reply;

pub use constants::*;
pub use reply::{Reply, ReplyError, is_restart_request};
