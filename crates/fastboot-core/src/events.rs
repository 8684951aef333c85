//! Event system for UI decoupling.
//!
//! The engine reports everything a front end wants to render through an
//! observer, so CLI output stays out of the protocol code.

use std::time::Duration;

/// Events emitted while the action queue executes.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// An action with a message is about to dispatch.
    ActionStarted { message: String },
    /// The action's reply handler accepted the result.
    ActionOkay { elapsed: Duration },
    /// The action failed; `reason` is the device's or transport's text.
    ActionFailed { reason: String },
    /// A product-scoped check was skipped on a different product.
    ActionIgnored {
        product: String,
        required: String,
        elapsed: Duration,
    },
    /// Non-terminal INFO line from the bootloader.
    BootloaderInfo { text: String },
    /// A queued notice, printed verbatim.
    Notice { text: String },
    /// A displayed variable, as `label: value`.
    VarDisplayed { label: String, value: String },
    /// A getvar requirement did not hold.
    RequirementMismatch {
        variable: String,
        actual: String,
        acceptable: Vec<String>,
        reject: bool,
    },
    /// The device requested a restart; the transport is being reopened.
    TransportRestarted,
    /// The walk ended (success or not) after this much wall time.
    QueueFinished { elapsed: Duration },
}

/// Observer trait for receiving engine events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::ActionStarted { message } => {
                tracing::info!("{}...", message);
            }
            FlashEvent::ActionOkay { elapsed } => {
                tracing::info!(elapsed = %format!("{:.3}s", elapsed.as_secs_f64()), "OKAY");
            }
            FlashEvent::ActionFailed { reason } => {
                tracing::error!("FAILED ({})", reason);
            }
            FlashEvent::ActionIgnored { product, required, .. } => {
                tracing::info!(product = %product, required = %required, "IGNORE");
            }
            FlashEvent::BootloaderInfo { text } => {
                tracing::info!("(bootloader) {}", text);
            }
            FlashEvent::Notice { text } => {
                tracing::info!("{}", text);
            }
            FlashEvent::VarDisplayed { label, value } => {
                tracing::info!("{}: {}", label, value);
            }
            FlashEvent::RequirementMismatch {
                variable,
                actual,
                acceptable,
                reject,
            } => {
                tracing::error!(
                    variable = %variable,
                    actual = %actual,
                    acceptable = ?acceptable,
                    "update {} another value",
                    if *reject { "rejects" } else { "requires" }
                );
            }
            FlashEvent::TransportRestarted => {
                tracing::warn!("Device restarting, reopening transport");
            }
            FlashEvent::QueueFinished { elapsed } => {
                tracing::info!("finished. total time: {:.3}s", elapsed.as_secs_f64());
            }
        }
    }
}
