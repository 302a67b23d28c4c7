//! Containment of collaborator panics.
//!
//! The delivery handler runs storage, message-factory and transaction calls
//! under [`contain`], so a panicking collaborator surfaces as an internal
//! protocol error instead of unwinding through the connection handler.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Displayable form of a caught panic payload.
///
/// `&'static str` and `String` payloads print their text; anything else
/// falls back to `Debug` formatting of the boxed value.
///
/// ```
/// use amqp_inbound::panic::contain;
///
/// let caught = contain(|| -> u8 { panic!("spool exploded") }).unwrap_err();
/// assert_eq!(caught.to_string(), "spool exploded");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// Wrap a payload returned by [`std::panic::catch_unwind`].
    pub fn new(payload: Box<dyn Any + Send>) -> Self { Self(payload) }

    fn text(&self) -> Option<&str> {
        self.0
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| self.0.downcast_ref::<String>().map(String::as_str))
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.write_str(text),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Run `f`, converting a panic into a [`PanicMessage`].
///
/// # Errors
///
/// Returns the formatted payload when `f` panics.
pub fn contain<R>(f: impl FnOnce() -> R) -> Result<R, PanicMessage> {
    catch_unwind(AssertUnwindSafe(f)).map_err(PanicMessage::new)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn static_str_payload_is_displayed() {
        let caught = contain(|| -> u8 { panic!("boom") }).expect_err("closure panics");
        assert_eq!(caught.to_string(), "boom");
    }

    #[rstest]
    fn formatted_payload_is_displayed() {
        let id = 7;
        let caught = contain(|| -> u8 { panic!("spool {id} missing") }).expect_err("closure panics");
        assert_eq!(caught.to_string(), "spool 7 missing");
    }

    #[rstest]
    fn opaque_payload_falls_back_to_debug() {
        let caught = PanicMessage::new(Box::new(5_u32));
        assert!(caught.to_string().contains("Any"));
    }

    #[rstest]
    fn value_passes_through_without_panic() {
        assert_eq!(contain(|| 42).expect("no panic"), 42);
    }
}
