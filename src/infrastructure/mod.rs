//! Concrete adapters for the domain layer's ports and repository traits.
//!
//! The domain layer never depends on anything in here directly; bootstrap
//! wires concrete types behind the trait objects domain code already
//! expects.

pub mod backup;
pub mod http_client_factory;
pub mod lock;
pub mod mock;
pub mod planner_trigger;
pub mod repositories;
pub mod sqlite_repositories;
