//! Outbound delivery for streambridge.
//!
//! - [`Dispatcher`]: signs and POSTs one payload to one target and
//!   classifies the outcome. Stateless; a 2xx response is success,
//!   everything else (transport error, timeout, non-2xx) is failure.
//! - [`RetryQueue`]: durable at-most-N queue driving the dispatcher with
//!   exponential backoff. State is persisted atomically on every change.
//! - [`OutputWriter`]: append-and-trim JSON history of every payload the
//!   pipeline produced, successful or not.

mod dispatcher;
mod retry;
mod sink;

pub use self::dispatcher::Dispatcher;
pub use self::retry::RetryQueue;
pub use self::sink::{OutputEntry, OutputWriter};
