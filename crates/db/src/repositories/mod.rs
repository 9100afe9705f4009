mod event_repository;
mod persona_repository;
mod snapshot_repository;

pub use event_repository::*;
pub use persona_repository::*;
pub use snapshot_repository::*;
