pub mod controller;

pub use controller::{Courier, SHUTDOWN_BROADCAST, read_batch};
