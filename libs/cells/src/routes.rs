//! Routing Table
//!
//! Maps destination domain names to links. Exact entries win over the
//! single optional default entry (conventionally the uplink), which
//! catches every unmatched destination and produces hub-and-spoke
//! topologies where a leaf domain only knows its uplink.

use crate::link::Link;
use std::collections::HashMap;
use std::sync::Arc;

/// Domain-name-to-link routing table.
#[derive(Default)]
pub struct RouteTable {
    exact: HashMap<String, Arc<dyn Link>>,
    default: Option<Arc<dyn Link>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an exact route. Replaces any previous entry for the domain.
    pub fn insert(&mut self, domain: impl Into<String>, link: Arc<dyn Link>) {
        self.exact.insert(domain.into(), link);
    }

    /// Remove the exact route for a domain.
    pub fn remove(&mut self, domain: &str) -> Option<Arc<dyn Link>> {
        self.exact.remove(domain)
    }

    /// Install the default (uplink) route.
    pub fn set_default(&mut self, link: Arc<dyn Link>) {
        self.default = Some(link);
    }

    pub fn clear_default(&mut self) {
        self.default = None;
    }

    /// Best matching link for a destination domain: exact entry first,
    /// then the default.
    pub fn lookup(&self, domain: &str) -> Option<Arc<dyn Link>> {
        self.exact
            .get(domain)
            .cloned()
            .or_else(|| self.default.clone())
    }

    /// Exact entry only, no default fallback.
    pub fn lookup_exact(&self, domain: &str) -> Option<Arc<dyn Link>> {
        self.exact.get(domain).cloned()
    }

    /// Domain-to-link-name pairs for every exact entry.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.exact
            .iter()
            .map(|(domain, link)| (domain.clone(), link.name().to_string()))
            .collect()
    }

    /// Every distinct link reachable from this table, default included.
    pub fn links(&self) -> Vec<Arc<dyn Link>> {
        let mut seen = HashMap::new();
        for link in self.exact.values().chain(self.default.iter()) {
            seen.entry(link.name().to_string())
                .or_insert_with(|| link.clone());
        }
        seen.into_values().collect()
    }

    /// Remove every entry (default included) that points at the named
    /// link. Returns the domains whose exact entries were withdrawn.
    pub fn withdraw_link(&mut self, link_name: &str) -> Vec<String> {
        let withdrawn: Vec<String> = self
            .exact
            .iter()
            .filter(|(_, link)| link.name() == link_name)
            .map(|(domain, _)| domain.clone())
            .collect();
        for domain in &withdrawn {
            self.exact.remove(domain);
        }
        if self
            .default
            .as_ref()
            .is_some_and(|link| link.name() == link_name)
        {
            self.default = None;
        }
        withdrawn
    }
}
