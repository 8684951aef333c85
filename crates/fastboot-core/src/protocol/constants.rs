//! Protocol constants for the fastboot wire protocol and the compound-image
//! container formats layered on top of it.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// HTC Corporation Vendor ID
pub const HTC_VENDOR_ID: u16 = 0x0BB4;
/// Google Vendor ID (Nexus / Pixel bootloaders)
pub const GOOGLE_VENDOR_ID: u16 = 0x18D1;

/// All vendor IDs considered during device discovery
pub const SUPPORTED_VIDS: &[u16] = &[HTC_VENDOR_ID, GOOGLE_VENDOR_ID];

/// Fastboot USB interface class / subclass / protocol triple
pub const FASTBOOT_CLASS: u8 = 0xFF;
pub const FASTBOOT_SUBCLASS: u8 = 0x42;
pub const FASTBOOT_PROTOCOL: u8 = 0x03;

// ============================================================================
// Wire Framing
// ============================================================================

/// Maximum command length in bytes, terminator included. Formatted commands
/// must be strictly shorter.
pub const MAX_COMMAND_SIZE: usize = 64;

/// Every reply frame starts with a four-byte ASCII header.
pub const REPLY_HEADER_SIZE: usize = 4;

/// Reply frames are read into a fixed window; anything past it is truncated.
pub const MAX_REPLY_SIZE: usize = 256;

/// Payload bytes available after the reply header.
pub const MAX_REPLY_PAYLOAD: usize = MAX_REPLY_SIZE - REPLY_HEADER_SIZE;

/// The `DATA` header carries exactly eight hex digits of payload size.
pub const DATA_SIZE_DIGITS: usize = 8;

/// The download announcement only carries 32-bit sizes.
pub const MAX_DOWNLOAD_SIZE: u64 = u32::MAX as u64;

// ============================================================================
// Restart Recovery
// ============================================================================

/// FAIL reason substring with which the bootloader announces that it will
/// re-enumerate before accepting the same image again.
pub const PRE_UPDATE_TRIGGER: &str = "hboot pre-update";

/// Settle time between queueing the disconnect wait and raising the
/// transport-restart flag.
pub const RESTART_SETTLE_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Large-Zip Container
// ============================================================================

/// ASCII prefix identifying a large-zip container.
pub const LARGEZIP_MAGIC: &[u8; 8] = b"LargeZip";

/// A large-zip container indexes at most eight embedded sub-zips.
pub const LARGEZIP_MAX_SUBIMAGES: usize = 8;

/// Fixed header size: magic plus eight little-endian start/length pairs.
pub const LARGEZIP_HEADER_SIZE: usize =
    LARGEZIP_MAGIC.len() + LARGEZIP_MAX_SUBIMAGES * 4 * 2;
