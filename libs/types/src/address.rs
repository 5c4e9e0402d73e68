//! Cell Addresses
//!
//! A cell is addressed as `name@domain`. A bare `name` leaves the domain
//! unset and resolves against the local domain at send time, not at parse
//! time, so the same parsed address can be reused by cells living in
//! different domains.

use crate::error::CellError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address of a single cell: a cell name plus an optional domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    cell: String,
    domain: Option<String>,
}

impl CellAddress {
    /// Address a cell in the local domain.
    pub fn local(cell: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            domain: None,
        }
    }

    /// Address a cell in a named domain.
    pub fn qualified(cell: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            domain: Some(domain.into()),
        }
    }

    /// Cell name.
    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// Domain name, if the address is qualified.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Whether this address resolves in `local_domain`.
    ///
    /// Unqualified addresses are local by definition.
    pub fn is_local_to(&self, local_domain: &str) -> bool {
        match &self.domain {
            None => true,
            Some(d) => d == local_domain,
        }
    }

    /// The domain this address routes to, defaulting to `local_domain`.
    pub fn domain_or<'a>(&'a self, local_domain: &'a str) -> &'a str {
        self.domain.as_deref().unwrap_or(local_domain)
    }
}

impl FromStr for CellAddress {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '@');
        let cell = parts.next().unwrap_or("");
        if cell.is_empty() {
            return Err(CellError::bad_address(s, "empty cell name"));
        }
        if cell.contains(':') {
            return Err(CellError::bad_address(s, "cell name contains ':'"));
        }
        match parts.next() {
            None => Ok(CellAddress::local(cell)),
            Some("") => Err(CellError::bad_address(s, "empty domain name")),
            Some(domain) if domain.contains('@') => {
                Err(CellError::bad_address(s, "more than one '@'"))
            }
            Some(domain) => Ok(CellAddress::qualified(cell, domain)),
        }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}@{}", self.cell, domain),
            None => write!(f, "{}", self.cell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified() {
        let addr: CellAddress = "echo@storage".parse().unwrap();
        assert_eq!(addr.cell(), "echo");
        assert_eq!(addr.domain(), Some("storage"));
        assert_eq!(addr.to_string(), "echo@storage");
    }

    #[test]
    fn test_parse_bare_name_is_unqualified() {
        let addr: CellAddress = "echo".parse().unwrap();
        assert_eq!(addr.cell(), "echo");
        assert_eq!(addr.domain(), None);
        assert!(addr.is_local_to("anything"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<CellAddress>().is_err());
        assert!("@domain".parse::<CellAddress>().is_err());
        assert!("cell@".parse::<CellAddress>().is_err());
        assert!("a@b@c".parse::<CellAddress>().is_err());
    }

    #[test]
    fn test_local_resolution() {
        let addr: CellAddress = "echo@storage".parse().unwrap();
        assert!(addr.is_local_to("storage"));
        assert!(!addr.is_local_to("doors"));
        assert_eq!(addr.domain_or("doors"), "storage");

        let bare = CellAddress::local("echo");
        assert_eq!(bare.domain_or("doors"), "doors");
    }
}
