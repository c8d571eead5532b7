//! Edge-side template processing for a caching reverse proxy.
//!
//! A response marked for processing is rewritten on the fly: its body is a
//! template mixing surface text with namespaced control elements
//! (`include`, `choose`/`when`/`otherwise`, `try`/`attempt`/`except`,
//! `vars`, `assign`, `comment`, `remove`) plus `$(...)` variable
//! substitution drawn from the client request. Fragments are fetched
//! concurrently as sub-requests while the rest of the document streams, and
//! no byte reaches the client until the document provably cannot end in an
//! error.
//!
//! The work is split across focused crates:
//! - [`surrogate_segment`]: bounded buffer chains the body travels in
//! - [`surrogate_markup`]: push scanner for the tag dialect
//! - [`surrogate_expr`]: the `test` attribute expression language
//! - [`surrogate_vars`]: request variables, substitution and `Vary`
//! - [`surrogate_tree`]: the template tree, processing and caching
//!
//! This crate ties them together behind [`Processor`], the per-response
//! driver a host proxy embeds.

mod cache;
mod context;
mod error;
mod fetch;

pub use cache::{MemoryTemplateCache, TemplateCache};
pub use context::{Processor, Read, always_passthrough};
pub use error::EsiError;
pub use fetch::{FetchOutcome, Fetcher, SubRequest};

pub use surrogate_segment::SegmentList;
pub use surrogate_tree::{CachedTemplate, Status, SubRequestId};
