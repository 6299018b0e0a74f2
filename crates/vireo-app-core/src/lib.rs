// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for Vireo servers (config, prefs).
//! Keeps the binary's adapters thin and framework-agnostic.

pub mod config;
pub mod prefs;
