// The hook side of the push: ref update lines as handed to us by the host.
pub mod commands;

pub use commands::{RefUpdate, RefUpdateList};
