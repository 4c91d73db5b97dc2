//! Source synchronisation

pub mod executor;
pub mod ports;

pub use executor::{ExecutorSettings, SyncExecutor};
pub use ports::{ChangeNotifier, NoopNotifier};
