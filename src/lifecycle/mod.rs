//! Process lifecycle signal handling

mod shutdown;

pub use shutdown::{ReloadSignal, ShutdownSignal};
