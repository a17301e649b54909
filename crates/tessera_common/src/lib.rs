//! Shared foundational types used across the Tessera revalidation engine.
//!
//! Currently this is the content digest that every cache decision is built
//! on: file digests, combined block digests and configuration slice digests
//! all use [`ContentHash`].

#![warn(missing_docs)]

pub mod hash;

pub use hash::{ContentHash, ParseHashError};
