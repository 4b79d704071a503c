use std::any::Any;
use std::fmt;

/// Wraps a string such that it does not get quoted when printed with [`fmt::Debug`].
#[derive(Clone, Copy)]
pub(crate) struct Unquote<'a>(pub(crate) &'a str);

impl Unquote<'static> {
    pub(crate) fn type_name<T: ?Sized>() -> Self {
        Unquote(std::any::type_name::<T>())
    }
}

impl fmt::Debug for Unquote<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extracts the message from a payload caught by [`std::panic::catch_unwind()`],
/// for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
