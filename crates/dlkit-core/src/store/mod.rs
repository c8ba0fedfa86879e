//! Persistent task-record store (C3: TaskStore).
//!
//! A row per task keyed by `task_id`; `request`, `segments`, and
//! `source_resume_state` are opaque JSON blobs so new sub-fields never force
//! a migration. All calls are serialised behind one pool-wide lock so
//! concurrent `save` calls never interleave within a single record.

mod db;

pub use db::TaskStore;
