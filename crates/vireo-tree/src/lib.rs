// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Render trees for Vireo live views, and the engine that turns two of them
//! into an ordered patch list.
//!
//! * [`node`] – the immutable tree produced by one render pass.
//! * [`patch`] – the mutation vocabulary understood by clients.
//! * [`diff`] / [`reconcile`] – the reconciliation engine.
//! * [`apply`] – reference applicator for the client contract.
//! * [`meta`] – metadata-only patches used to boot a client over SSR markup.
//! * [`html`] – HTML serialization for the buffered (SSR) path.

pub mod apply;
pub mod diff;
pub mod flatten;
pub mod html;
pub mod meta;
pub mod node;
pub mod patch;
pub mod reconcile;

pub use apply::{apply, ApplyError};
pub use diff::{diff, DiffError, Differ, DuplicateKey, DuplicateKeyPolicy, Side};
pub use flatten::flatten;
pub use html::to_html;
pub use meta::metadata_patches;
pub use node::{Attrs, Element, HandlerMeta, Node, ScriptMeta, Styles, Stylesheet};
pub use patch::{MoveValue, OpKind, Patch, PatchValue};
