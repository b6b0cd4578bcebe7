// ── Subscriber faults ──
//
// A failing subscriber must not prevent delivery to the others. Failures
// (an error return or a panic) are caught at the delivery site and handed
// to a `FaultObserver` exactly once per failed delivery.

use std::any::Any;
use std::fmt;

use serde::Serialize;

/// Error returned by a fallible subscriber callback.
///
/// Any `std::error::Error` converts into it, so callbacks can use `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberError {
    message: String,
}

impl SubscriberError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for SubscriberError {
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

/// How a subscriber failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FaultReason {
    Failed(String),
    Panicked(String),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "callback failed: {msg}"),
            Self::Panicked(msg) => write!(f, "callback panicked: {msg}"),
        }
    }
}

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberFault {
    /// Bus-unique id of the failing subscription.
    pub subscription: u64,
    /// Rust type name of the message being delivered.
    pub message_type: &'static str,
    pub reason: FaultReason,
}

impl fmt::Display for SubscriberFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subscription {} ({}): {}",
            self.subscription, self.message_type, self.reason
        )
    }
}

/// Receives subscriber faults. Called on the thread that ran the callback.
pub trait FaultObserver: Send + Sync {
    fn on_fault(&self, fault: &SubscriberFault);
}

impl<F> FaultObserver for F
where
    F: Fn(&SubscriberFault) + Send + Sync,
{
    fn on_fault(&self, fault: &SubscriberFault) {
        self(fault);
    }
}

/// Default observer: logs every fault at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultObserver;

impl FaultObserver for TracingFaultObserver {
    fn on_fault(&self, fault: &SubscriberFault) {
        tracing::error!(
            subscription = fault.subscription,
            message_type = fault.message_type,
            reason = %fault.reason,
            "subscriber fault"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn std_errors_convert_into_subscriber_errors() {
        fn parse(raw: &str) -> Result<u32, SubscriberError> {
            Ok(raw.parse::<u32>()?)
        }
        let err = parse("x").unwrap_err();
        assert!(err.message().contains("invalid digit"));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }

    #[test]
    fn fault_display_names_the_subscription() {
        let fault = SubscriberFault {
            subscription: 3,
            message_type: "ObjectChange",
            reason: FaultReason::Panicked("boom".into()),
        };
        assert_eq!(
            fault.to_string(),
            "subscription 3 (ObjectChange): callback panicked: boom"
        );
    }
}
