//! # recurrence-engine
//!
//! Recurring calendar entries with per-occurrence exceptions.
//!
//! Given a recurring entry and a time window, the engine produces the
//! concrete occurrences of the series, honoring deleted and modified single
//! instances. It also keeps those exception records consistent when one
//! occurrence or a whole series is edited or deleted. All instants are UTC.
//!
//! Persistence is abstracted behind two async traits in [`store`]; the engine
//! does not speak HTTP or own a database connection.
//!
//! ## Modules
//!
//! - [`time`] - UTC instant arithmetic and boundary parsing
//! - [`rule`] - Recurrence rule codec (build, serialize, parse, generate)
//! - [`model`] - Entries, exceptions, occurrences and update inputs
//! - [`store`] - `CalendarEntryStore` / `ExceptionStore` traits
//! - [`memory`] - In-memory store implementations
//! - [`expander`] - Window expansion with deletions and modifications folded in
//! - [`reanchor`] - Moving exceptions with a rescheduled series
//! - [`service`] - Create / get / list / update / delete orchestration
//! - [`config`] - Engine tunables
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod expander;
pub mod memory;
pub mod model;
pub mod reanchor;
pub mod rule;
pub mod service;
pub mod store;
pub mod time;

pub use config::EngineConfig;
pub use error::{EngineError, StoreError};
pub use expander::{contributes_to_window, expand, sort_chronologically};
pub use memory::{InMemoryEntryStore, InMemoryExceptionStore};
pub use model::{
    CalendarEntry, EntryException, EntryPatch, EntryUpdate, ExceptionFields, ExceptionTiming,
    NewEntry, Occurrence,
};
pub use reanchor::reanchor_exception;
pub use rule::{build_rule, Frequency, RecurrenceRule};
pub use service::{CalendarService, DeleteOutcome, ListQuery, Scope, UpdateOutcome};
pub use store::{CalendarEntryStore, ExceptionStore};
