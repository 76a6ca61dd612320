//! Core library for sitepatch: idempotent bulk text patching over a
//! static site corpus, plus sitemap generation.
//!
//! The pipeline is corpus walker → transform rules → idempotency guard
//! (compare, then atomic replace) → run summary. Every component is a
//! stateless pass; the corpus on disk is the only persistent state.

pub mod config;
pub mod engine;
pub mod report;
pub mod rules;
pub mod runtime;
pub mod sitemap;
pub mod walker;
