//! Regula ruleset storage -- versioned persistence, listing, and change
//! feeds over a transactional key-value store.
//!
//! A [`RulesetService`] binds a namespace in a [`kv::KvStore`] and
//! exposes the ruleset lifecycle: signatures are created once, rule
//! versions accumulate under k-sortable identifiers, and watchers
//! follow new versions through a replayable change feed. The service
//! implements [`regula_engine::Evaluator`], so an
//! [`regula_engine::Engine`] can serve typed evaluations straight from
//! storage.
//!
//! [`MemoryStore`] is the in-process backend; the
//! [`conformance`] suite verifies any other backend against the same
//! contract.

pub mod conformance;
pub mod kv;

mod codec;
mod config;
mod error;
mod keys;
mod memory;
mod service;
mod validate;

pub use config::Config;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use service::{
    ListOptions, RulesetEntry, RulesetEvent, RulesetEvents, RulesetPage, RulesetService,
    WatchOptions,
};
