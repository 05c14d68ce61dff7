//! Backup target identity
//!
//! A node is written `repo.dotted.name`: everything before the first dot is
//! the repository, the rest is the node's logical path inside it.

use crate::error::ParseError;
use std::fmt;
use std::str::FromStr;

/// Separator between repository and name, and between name segments
pub const NODE_SEPARATOR: char = '.';

/// A uniquely addressable backup target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    repo: String,
    name: String,
    path: String,
}

impl Node {
    /// Parse `repo.name` into a node
    ///
    /// Fails when the separator is missing or either side is empty.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::Node {
            input: input.to_string(),
        };

        let (repo, name) = input.split_once(NODE_SEPARATOR).ok_or_else(invalid)?;
        if repo.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            repo: repo.to_string(),
            name: name.to_string(),
            path: name.replace(NODE_SEPARATOR, "/"),
        })
    }

    /// Repository (partition namespace)
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Dotted logical name within the repository
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with separators turned into `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical `repo.name` string used for display and routing
    pub fn identity_key(&self) -> String {
        format!("{}{}{}", self.repo, NODE_SEPARATOR, self.name)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.repo, NODE_SEPARATOR, self.name)
    }
}

impl FromStr for Node {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Node::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node() {
        let node = Node::parse("website.testing.sub.page").unwrap();
        assert_eq!(node.repo(), "website");
        assert_eq!(node.name(), "testing.sub.page");
        assert_eq!(node.path(), "testing/sub/page");
        assert_eq!(node.identity_key(), "website.testing.sub.page");
        assert_eq!(node.to_string(), node.identity_key());
    }

    #[test]
    fn test_parse_single_segment() {
        let node: Node = "siteA.home".parse().unwrap();
        assert_eq!(node.repo(), "siteA");
        assert_eq!(node.path(), "home");
    }

    #[test]
    fn test_parse_invalid_node() {
        for input in ["badline", "", ".home", "website.", "."] {
            let err = Node::parse(input).unwrap_err();
            assert_eq!(
                err,
                ParseError::Node {
                    input: input.to_string()
                }
            );
        }
    }

    #[test]
    fn test_identity_key_stable() {
        let key = Node::parse("siteA.x").unwrap().identity_key();
        for _ in 0..100 {
            assert_eq!(Node::parse("siteA.x").unwrap().identity_key(), key);
        }
    }
}
