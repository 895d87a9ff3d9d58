//! Configuration for the hierarchical navigation manager

use detour::DT_NULL_IDX;
use nav_common::{Error, Result};

/// Largest node pool the 16-bit node indices can address
pub const MAX_SEARCH_NODES: usize = DT_NULL_IDX as usize - 1;

/// Configuration parameters for [`Navigation`](crate::Navigation)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct NavigationConfig {
    /// Number of hierarchy levels, i.e. graph slots allocated by `init`
    pub levels: usize,
    /// Node capacity of the search node pool and open list
    pub max_nodes: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            max_nodes: 2048,
        }
    }
}

impl NavigationConfig {
    /// Creates a configuration with explicit values
    pub fn new(levels: usize, max_nodes: usize) -> Self {
        Self { levels, max_nodes }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(Error::InvalidConfig(
                "max_nodes must be at least 1".to_string(),
            ));
        }

        if self.max_nodes > MAX_SEARCH_NODES {
            return Err(Error::InvalidConfig(format!(
                "max_nodes {} exceeds the node index limit {}",
                self.max_nodes, MAX_SEARCH_NODES
            )));
        }

        Ok(())
    }
}
