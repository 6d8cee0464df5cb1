//! Types shared by every courier crate: the dispatched [`Message`], its
//! [`Fingerprint`], the process [`Signal`] and the logging setup.

pub mod logging;
pub mod message;

pub use message::{Fingerprint, Message};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
