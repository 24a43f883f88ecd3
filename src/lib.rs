//! # Warden: an in-memory access-control authorization core
//!
//! Warden models an Access Control Service's authorization core: an entity
//! graph of users, groups, and roles, an inheritance-aware permission
//! evaluator, and the single-writer command pipeline that mutates the graph
//! under write-behind persistence and a resilience/health layer.
//!
//! ## Core concepts
//!
//! - **Entities**: [`entities::entity::Entity`] is a tagged `User | Group |
//!   Role` variant; edges between them are symmetric id sets, not owning
//!   references, so the graph stays cycle-safe without lifetimes.
//! - **Permissions**: URI-pattern-scoped grants/denies
//!   ([`entities::entity::Permission`]), matched by the evaluator
//!   ([`evaluator::PermissionEvaluator`]) under inheritance and one of five
//!   conflict-resolution strategies ([`evaluator::conflict::ConflictStrategy`]).
//! - **Commands**: the closed [`commands::command::Command`] surface is the
//!   only way to mutate the graph, processed one at a time by
//!   [`commands::dispatcher::Dispatcher`] so the graph never needs internal
//!   locking.
//! - **Persistence**: accepted mutations are written through
//!   [`persistence::coordinator::PersistenceCoordinator`] to a
//!   [`persistence::port::PersistencePort`] backend, with dead-letter retry
//!   on failure.
//! - **Resilience**: [`resilience::Resilience`] wraps persistence (and any
//!   other externally-facing call) with a circuit breaker, bounded retries,
//!   a timeout, and rolling health metrics, per operation class.
//!
//! ## Quick start
//!
//! ```
//! use warden::types::{UriPattern, Verb};
//!
//! let pattern = UriPattern::parse("/api/users/*");
//! assert!(pattern.is_glob());
//! assert_eq!(Verb::decode("get"), Some(Verb::Get));
//! ```
//!
//! ## Module guide
//!
//! - [`config`] — layered configuration (`config` + `dotenvy`)
//! - [`errors`] — crate-wide error aggregation
//! - [`telemetry`] — tracing-subscriber initialization
//! - [`types`] — shared identifiers and small tagged types
//! - [`entities`] — the entity graph (Component A)
//! - [`evaluator`] — the permission evaluator (Component B)
//! - [`commands`] — the command surface and dispatcher (Component C)
//! - [`persistence`] — the persistence port and write-behind coordinator (Component D)
//! - [`resilience`] — circuit breaker, retry, and health (Component E)

pub mod commands;
pub mod config;
pub mod entities;
pub mod errors;
pub mod evaluator;
pub mod persistence;
pub mod resilience;
pub mod telemetry;
pub mod types;

pub use commands::command::{Command, CommandError, CommandOutcome, CorrelationId, EntityAttrs};
pub use commands::dispatcher::{CancelToken, Dispatcher, DispatcherHandle};
pub use config::WardenConfig;
pub use entities::entity::{Entity, Group, Permission, Role, User};
pub use entities::graph::EntityGraph;
pub use errors::WardenError;
pub use evaluator::{Decision, PermissionEvaluator};
pub use types::{EdgeKind, EntityId, EntityKind, UriPattern, Verb};
