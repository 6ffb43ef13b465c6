// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for confstage crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - Schema builders and a sample device configuration
//! - [`transport`] - Scripted transport fake

pub mod config;
pub mod fixtures;
pub mod transport;

pub use config::InMemoryConfigStore;
pub use fixtures::{loaded_session, sample_config, sample_root, SchemaBuilder};
pub use transport::{Call, FakeTransport};
