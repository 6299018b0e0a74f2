// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Vireo crates.
#![forbid(unsafe_code)]
//!
//! Used from `tests/` directories only; crates that this one depends on
//! cannot pull it into their unit tests.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`transport`] - Transport double that records every send
//! - [`views`] - Counter, keyed-list and scripted views
//! - [`fixtures`] - Ready-made render trees

pub mod config;
pub mod fixtures;
pub mod transport;
pub mod views;

pub use config::InMemoryConfigStore;
pub use fixtures::{counter_tree, keyed_list, sample_page};
pub use transport::{RecordedSend, RecordingTransport};
pub use views::{CounterView, KeyedListView, ScriptedView};
