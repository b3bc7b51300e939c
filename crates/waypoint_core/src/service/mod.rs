//! Use-case services orchestrating repositories and domain rules.
//!
//! # Responsibility
//! - Template resolution and counselor overrides.
//! - Task instantiation and completion side effects.
//! - Meeting lifecycle transitions and the domain events they emit.
//! - Roadmap application and removal.
//!
//! # Invariants
//! - Services return emitted domain events to the caller; they never talk
//!   to external systems themselves.
//! - Multi-write operations expect to run inside `db::unit_of_work`.

pub mod meeting_service;
pub mod roadmap_service;
pub mod task_service;
pub mod template_resolver;
