//! The chat-to-spreadsheet pipeline.
//!
//! A model reply is parsed into an explanation and a Lua fragment
//! ([`response`]), wrapped into a self-contained unit ([`sandbox`]), run in a
//! restricted VM ([`executor`]), decoded ([`decoder`]), and merged back into
//! the styled grid and the columnar table through a [`changeset::ChangeSet`]
//! ([`reconcile`], [`document`]). [`session`] drives the loop, including
//! automatic retries after execution failures.

pub mod changeset;
pub mod chart;
pub mod client;
pub mod decoder;
pub mod document;
pub mod error;
pub mod executor;
pub mod prompt;
pub mod reconcile;
pub mod response;
pub mod retry;
pub mod runtime;
pub mod sandbox;
pub mod session;
pub mod snapshot;
pub mod undo;
pub mod worker;

pub use error::PipelineError;
