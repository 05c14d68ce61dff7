//! Connection descriptor for a content source
//!
//! A session is given on the command line as `endpoint,name=value`, where
//! `name=value` is the credential (typically a session cookie) presented on
//! every request. Parsing never touches the network.

use crate::error::ParseError;
use std::fmt;
use std::str::FromStr;

/// Endpoint plus the credential used to reach it
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    endpoint: String,
    credential_name: String,
    credential_value: String,
}

impl Session {
    /// Parse an `endpoint,name=value` specification
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let invalid = |reason: &'static str| ParseError::Session {
            input: input.to_string(),
            reason,
        };

        let (endpoint, credential) = input
            .split_once(',')
            .ok_or_else(|| invalid("expected 'endpoint,name=value'"))?;
        let endpoint = endpoint.trim();
        let credential = credential.trim();
        if endpoint.is_empty() {
            return Err(invalid("empty endpoint"));
        }
        if credential.is_empty() {
            return Err(invalid("empty credential"));
        }

        let (name, value) = credential
            .split_once('=')
            .ok_or_else(|| invalid("credential must be 'name=value'"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            return Err(invalid("credential name and value must be non-empty"));
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential_name: name.to_string(),
            credential_value: value.to_string(),
        })
    }

    /// Base URL of the content source, without a trailing slash
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Credential (cookie) name
    pub fn credential_name(&self) -> &str {
        &self.credential_name
    }

    /// Credential (cookie) value
    pub fn credential_value(&self) -> &str {
        &self.credential_value
    }

    /// `name=value` as sent in a Cookie header
    pub fn cookie(&self) -> String {
        format!("{}={}", self.credential_name, self.credential_value)
    }
}

// Keep the credential value out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("credential_name", &self.credential_name)
            .field("credential_value", &"***")
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.endpoint, self.credential_name)
    }
}

impl FromStr for Session {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Session::parse(s)
    }
}
