//! Database implementations

pub mod event_repository;
pub mod manager;
pub mod member_repository;
pub mod native_event_repository;
pub mod source_repository;

pub use event_repository::SqliteEventStore;
pub use manager::{DbManager, SqliteConnection, SqlitePool};
pub use member_repository::{HouseholdMember, SqliteUserDirectory};
pub use native_event_repository::SqliteNativeEventRepository;
pub use source_repository::SqliteSourceRepository;
