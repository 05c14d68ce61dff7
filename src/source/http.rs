//! HTTP content source
//!
//! Talks to the CMS dump/export endpoints:
//! - `GET {endpoint}/docroot/gato/dump.jsp?repository=..&depth=999&path=/..`
//!   lists every record below the node, one per line, in no stable order.
//! - `GET {endpoint}/docroot/gato/export.jsp?repo=..&path=/..`
//!   returns the full XML export of the node.
//!
//! The session credential is sent as a cookie. Redirects are never
//! followed: the CMS answers an expired or invalid session with a redirect
//! to its login page, which must not be mistaken for content.

use crate::error::{ConfigError, SourceError, SourceResult};
use crate::fingerprint::Fingerprint;
use crate::node::Node;
use crate::session::Session;
use crate::source::ContentSource;
use reqwest::blocking::{Client, Response};
use reqwest::header::COOKIE;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::io::{self, Write};
use std::time::Duration;
use tracing::trace;

/// Default dump (fingerprint) endpoint, relative to the session endpoint
pub const DEFAULT_DUMP_PATH: &str = "/docroot/gato/dump.jsp";

/// Default export (content) endpoint, relative to the session endpoint
pub const DEFAULT_EXPORT_PATH: &str = "/docroot/gato/export.jsp";

/// Traversal depth requested from the dump endpoint
const DUMP_DEPTH: &str = "999";

/// Builder for [`HttpSource`]
#[derive(Debug, Clone)]
pub struct HttpSourceBuilder {
    timeout: Option<Duration>,
    dump_path: String,
    export_path: String,
}

impl Default for HttpSourceBuilder {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
            dump_path: DEFAULT_DUMP_PATH.to_string(),
            export_path: DEFAULT_EXPORT_PATH.to_string(),
        }
    }
}

impl HttpSourceBuilder {
    /// Create a builder with default endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request timeout (`None` waits forever)
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the dump endpoint path
    pub fn dump_path(mut self, path: impl Into<String>) -> Self {
        self.dump_path = path.into();
        self
    }

    /// Override the export endpoint path
    pub fn export_path(mut self, path: impl Into<String>) -> Self {
        self.export_path = path.into();
        self
    }

    /// Build the source
    pub fn build(self) -> Result<HttpSource, ConfigError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(HttpSource {
            client,
            dump_path: self.dump_path,
            export_path: self.export_path,
        })
    }
}

/// Content source backed by a blocking HTTP client
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    dump_path: String,
    export_path: String,
}

impl HttpSource {
    /// Start building a source
    pub fn builder() -> HttpSourceBuilder {
        HttpSourceBuilder::new()
    }

    fn get(&self, session: &Session, path: &str, query: &[(&str, &str)]) -> SourceResult<Response> {
        let url = format!("{}{}", session.endpoint(), path);
        trace!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header(COOKIE, session.cookie())
            .send()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        check_status(response.status())?;
        Ok(response)
    }
}

/// Only a plain 200 counts as success
fn check_status(status: StatusCode) -> SourceResult<()> {
    if status.is_redirection() {
        return Err(SourceError::RedirectEncountered {
            status: status.as_u16(),
        });
    }
    if status != StatusCode::OK {
        return Err(SourceError::Protocol {
            status: status.as_u16(),
        });
    }
    Ok(())
}

impl ContentSource for HttpSource {
    fn fetch_fingerprint(&self, session: &Session, node: &Node) -> SourceResult<Fingerprint> {
        let path = format!("/{}", node.path());
        let response = self.get(
            session,
            &self.dump_path,
            &[("repository", node.repo()), ("depth", DUMP_DEPTH), ("path", &path)],
        )?;

        // The whole dump is needed in memory to sort it.
        let body = response
            .bytes()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Fingerprint::of_records(&body))
    }

    fn fetch_content(
        &self,
        session: &Session,
        node: &Node,
        sink: &mut dyn Write,
    ) -> SourceResult<u64> {
        let path = format!("/{}", node.path());
        let mut response = self.get(
            session,
            &self.export_path,
            &[("repo", node.repo()), ("path", &path)],
        )?;

        let bytes = io::copy(&mut response, sink)?;
        sink.flush()?;
        Ok(bytes)
    }
}
