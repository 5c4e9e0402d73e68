//! Cell Paths
//!
//! A path is the ordered list of addresses an envelope travels through,
//! together with a cursor marking the hop it is currently addressed to.
//! Hops before the cursor have been traversed; the hop at the cursor is the
//! present destination. Reverting a path mirrors both the hop order and the
//! cursor, which is what lets a reply retrace a request's route without any
//! intermediate domain remembering the sender.

use crate::address::CellAddress;
use crate::error::CellError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between hops in the textual form, e.g. `gateway@hub:pool@store`.
const HOP_SEPARATOR: char = ':';

/// An ordered sequence of cell addresses with a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPath {
    hops: Vec<CellAddress>,
    position: usize,
}

impl CellPath {
    /// Empty path.
    pub fn empty() -> Self {
        Self {
            hops: Vec::new(),
            position: 0,
        }
    }

    /// Path with a single hop.
    pub fn single(address: CellAddress) -> Self {
        Self {
            hops: vec![address],
            position: 0,
        }
    }

    /// Path over the given hops, cursor on the first.
    pub fn new(hops: Vec<CellAddress>) -> Self {
        Self { hops, position: 0 }
    }

    /// Build the path of an outbound request: the sender's own address
    /// followed by the destination hops, cursor on the first destination.
    pub fn outbound(source: CellAddress, destination: CellPath) -> Self {
        let mut hops = Vec::with_capacity(1 + destination.hops.len());
        hops.push(source);
        let position = 1 + destination.position;
        hops.extend(destination.hops);
        Self { hops, position }
    }

    /// The hop the envelope is currently addressed to.
    pub fn current(&self) -> Option<&CellAddress> {
        self.hops.get(self.position)
    }

    /// The first hop, conventionally the originator.
    pub fn first(&self) -> Option<&CellAddress> {
        self.hops.first()
    }

    /// Move the cursor one hop forward. Returns `false` at the final hop.
    pub fn advance(&mut self) -> bool {
        if self.position + 1 < self.hops.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Whether the cursor is on the final hop.
    pub fn at_final_hop(&self) -> bool {
        self.hops.is_empty() || self.position == self.hops.len() - 1
    }

    /// Record an intermediate hop traversed on the way to the current
    /// target. The hop is inserted before the cursor so the current
    /// destination is unchanged but a reverted path will retrace it.
    pub fn append(&mut self, hop: CellAddress) {
        self.hops.insert(self.position, hop);
        self.position += 1;
    }

    /// Push a hop onto the end of the route.
    pub fn push(&mut self, hop: CellAddress) {
        self.hops.push(hop);
    }

    /// A new path with the hops reversed and the cursor mirrored.
    ///
    /// Reverting twice yields the original path.
    pub fn revert(&self) -> Self {
        if self.hops.is_empty() {
            return Self::empty();
        }
        let mut hops = self.hops.clone();
        hops.reverse();
        Self {
            position: self.hops.len() - 1 - self.position,
            hops,
        }
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the path has no hops.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// All hops in order.
    pub fn hops(&self) -> &[CellAddress] {
        &self.hops
    }
}

impl FromStr for CellPath {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CellError::bad_address(s, "empty path"));
        }
        let hops = s
            .split(HOP_SEPARATOR)
            .map(|part| part.parse::<CellAddress>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CellPath::new(hops))
    }
}

impl fmt::Display for CellPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", HOP_SEPARATOR)?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}

impl From<CellAddress> for CellPath {
    fn from(address: CellAddress) -> Self {
        CellPath::single(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> CellAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_multi_hop() {
        let path: CellPath = "gateway@hub:pool@store".parse().unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.position(), 0);
        assert_eq!(path.current().unwrap(), &addr("gateway@hub"));

        // Building the same route by hand matches the parsed form.
        let mut built = CellPath::single(addr("gateway@hub"));
        built.push(addr("pool@store"));
        assert_eq!(built, path);
        assert_eq!(built.to_string(), "gateway@hub:pool@store");
    }

    #[test]
    fn test_advance_stops_at_final_hop() {
        let mut path: CellPath = "a@x:b@y".parse().unwrap();
        assert!(!path.at_final_hop());
        assert!(path.advance());
        assert_eq!(path.current().unwrap(), &addr("b@y"));
        assert!(path.at_final_hop());
        assert!(!path.advance());
    }

    #[test]
    fn test_outbound_points_at_destination() {
        let path = CellPath::outbound(addr("client@doors"), CellPath::single(addr("pool@store")));
        assert_eq!(path.len(), 2);
        assert_eq!(path.current().unwrap(), &addr("pool@store"));
        assert_eq!(path.first().unwrap(), &addr("client@doors"));
    }

    #[test]
    fn test_append_keeps_current_target() {
        let mut path = CellPath::outbound(addr("client@doors"), CellPath::single(addr("pool@store")));
        path.append(addr("tunnel@hub"));
        assert_eq!(path.current().unwrap(), &addr("pool@store"));
        assert_eq!(path.hops()[1], addr("tunnel@hub"));
    }

    #[test]
    fn test_revert_retraces_hops() {
        let mut path = CellPath::outbound(addr("client@doors"), CellPath::single(addr("pool@store")));
        path.append(addr("tunnel@hub"));

        // The responder reverts and walks back: itself, the tunnel, the client.
        let mut reply = path.revert();
        assert_eq!(reply.current().unwrap(), &addr("pool@store"));
        assert!(reply.advance());
        assert_eq!(reply.current().unwrap(), &addr("tunnel@hub"));
        assert!(reply.advance());
        assert_eq!(reply.current().unwrap(), &addr("client@doors"));
        assert!(reply.at_final_hop());
    }

    #[test]
    fn test_revert_empty_path() {
        let path = CellPath::empty();
        assert_eq!(path.revert(), path);
    }

    prop_compose! {
        fn arb_address()(cell in "[a-z]{1,8}", domain in proptest::option::of("[a-z]{1,8}")) -> CellAddress {
            match domain {
                Some(d) => CellAddress::qualified(cell, d),
                None => CellAddress::local(cell),
            }
        }
    }

    prop_compose! {
        fn arb_path()(hops in proptest::collection::vec(arb_address(), 1..8))
                     (position in 0..hops.len(), hops in Just(hops)) -> CellPath {
            let mut path = CellPath::new(hops);
            for _ in 0..position {
                path.advance();
            }
            path
        }
    }

    proptest! {
        #[test]
        fn prop_revert_is_involution(path in arb_path()) {
            prop_assert_eq!(path.revert().revert(), path);
        }

        #[test]
        fn prop_revert_preserves_hop_set(path in arb_path()) {
            let mut forward = path.hops().to_vec();
            let mut backward = path.revert().hops().to_vec();
            forward.sort_by_key(|a| a.to_string());
            backward.sort_by_key(|a| a.to_string());
            prop_assert_eq!(forward, backward);
        }
    }
}
