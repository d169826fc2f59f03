//! Document persistence over MongoDB
//!
//! This crate provides an object-document layer with change tracking on top
//! of a MongoDB-compatible driver.
//!
//! # Features
//! - Filter expression and update operator builders
//! - Declarative per-collection validation rules
//! - Documents that track a dirty delta and save only what changed
//! - Per-collection identity pool of hydrated documents
//! - Write concern handling and error translation for every write
//! - Lazy cursors and aggregation pipeline builders
//! - An in-process driver for tests and embedding

pub mod ack;
pub mod client;
pub mod collection;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod document;
pub mod driver;
pub mod expression;
pub mod index;
pub mod memory;
pub mod names;
pub mod operator;
pub mod options;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod write_concern;

pub use ack::RawAck;
pub use client::Client;
pub use collection::Collection;
pub use config::ClientConfig;
pub use connection::{MongoDriver, PoolConfig};
pub use cursor::Cursor;
pub use database::Database;
pub use document::{Document, DocumentState, FieldChange, SharedDocument};
pub use driver::Driver;
pub use expression::Expression;
pub use index::{IndexDeclaration, IndexOptions};
pub use memory::{MemoryDriver, StoreError};
pub use mnemosyne_common::{MnemosyneError, Result, Violation, Violations};
pub use mnemosyne_validation::{Rule, RuleSet};
pub use operator::Operator;
pub use options::{
    FindOptions, Namespace, ReadMode, ReadPreference, RemoveOptions, TagSet, UpdateOptions,
};
pub use pipeline::{AggregateInput, Pipeline};
pub use pool::DocumentPool;
pub use registry::{CollectionDefinition, CollectionRegistry};
pub use write_concern::{Acknowledgment, WriteConcern};
