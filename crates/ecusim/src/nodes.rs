//! Diagnostic address table of the nodes found on the bench
//!
//! `rx_id` is the physical request ID the simulated ECU listens on,
//! `tx_id` the ID it answers from.

use serde::{Deserialize, Serialize};

use crate::config::deserialize_can_id;

/// Diagnostic addressing of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub name: String,
    #[serde(deserialize_with = "deserialize_can_id")]
    pub rx_id: u32,
    #[serde(deserialize_with = "deserialize_can_id")]
    pub tx_id: u32,
}

impl NodeAddress {
    fn new(name: &str, rx_id: u32, tx_id: u32) -> Self {
        Self {
            name: name.to_string(),
            rx_id,
            tx_id,
        }
    }
}

/// Node lookup table, case-insensitive by name
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Vec<NodeAddress>,
}

impl NodeTable {
    /// Nodes known out of the box
    pub fn builtin() -> Self {
        Self {
            nodes: vec![
                NodeAddress::new("SMLS", 0x731, 0x739),
                NodeAddress::new("BMS", 0x7E2, 0x7EA),
                NodeAddress::new("PWR", 0x7E3, 0x7EB),
                NodeAddress::new("OCDC", 0x7E5, 0x7ED),
                NodeAddress::new("TMM", 0x7E6, 0x7EE),
                NodeAddress::new("HCU", 0x7E7, 0x7EF),
                NodeAddress::new("IBRS", 0x710, 0x718),
                NodeAddress::new("IMS", 0x749, 0x759),
                NodeAddress::new("VCU", 0x7E1, 0x7E9),
            ],
        }
    }

    /// Built-in table with additional or replaced entries
    pub fn with_overrides(extra: &[NodeAddress]) -> Self {
        let mut table = Self::builtin();
        for node in extra {
            match table
                .nodes
                .iter_mut()
                .find(|known| known.name.eq_ignore_ascii_case(&node.name))
            {
                Some(known) => *known = node.clone(),
                None => table.nodes.push(node.clone()),
            }
        }
        table
    }

    pub fn lookup(&self, name: &str) -> Option<&NodeAddress> {
        self.nodes
            .iter()
            .find(|node| node.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_ignores_case() {
        let table = NodeTable::builtin();
        let ims = table.lookup("ims").unwrap();
        assert_eq!((ims.rx_id, ims.tx_id), (0x749, 0x759));
        assert!(table.lookup("ABS").is_none());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let table = NodeTable::with_overrides(&[
            NodeAddress::new("vcu", 0x7E0, 0x7E8),
            NodeAddress::new("ABS", 0x720, 0x728),
        ]);
        assert_eq!(table.lookup("VCU").unwrap().rx_id, 0x7E0);
        assert_eq!(table.lookup("abs").unwrap().tx_id, 0x728);
        assert_eq!(table.names().len(), 10);
    }
}
