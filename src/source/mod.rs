//! Remote content sources
//!
//! A content source answers two questions about a node through a session:
//! what its content currently looks like (a [`Fingerprint`]) and what the
//! full content is (streamed into a sink). Workers only see the
//! [`ContentSource`] trait, so tests substitute in-memory sources.

pub mod http;

pub use http::{HttpSource, HttpSourceBuilder};

use crate::error::SourceResult;
use crate::fingerprint::Fingerprint;
use crate::node::Node;
use crate::session::Session;
use std::io::Write;

/// Network side of a backup
///
/// Implementations must fail, never fall back to a default value, on
/// non-success responses and on redirects.
pub trait ContentSource: Send + Sync {
    /// Fingerprint of the node's complete current content
    ///
    /// Two calls against unchanged content must return the same value even
    /// if the remote lists records in a different order.
    fn fetch_fingerprint(&self, session: &Session, node: &Node) -> SourceResult<Fingerprint>;

    /// Stream the node's full content into `sink`, returning bytes written
    ///
    /// On failure the sink may hold partial data.
    fn fetch_content(
        &self,
        session: &Session,
        node: &Node,
        sink: &mut dyn Write,
    ) -> SourceResult<u64>;
}
