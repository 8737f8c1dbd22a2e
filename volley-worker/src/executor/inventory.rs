//! Host inventory
//!
//! A plain text file listing one host per line. Blank lines and `#`
//! comments are ignored.

use std::path::Path;

use volley_core::store::glob_match;
use volley_core::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    hosts: Vec<String>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Prepare(format!("cannot read inventory {}: {}", path.display(), e))
        })?;
        let inventory = Self::parse(&content);
        tracing::info!(
            "Loaded {} host(s) from inventory {}",
            inventory.hosts.len(),
            path.display()
        );
        Ok(inventory)
    }

    pub fn parse(content: &str) -> Self {
        let mut hosts: Vec<String> = Vec::new();
        for line in content.lines() {
            let host = line.split('#').next().unwrap_or_default().trim();
            if !host.is_empty() && !hosts.iter().any(|h| h == host) {
                hosts.push(host.to_string());
            }
        }
        Self { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Hosts matching a glob pattern (`*`, `?`), in inventory order
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|host| glob_match(pattern, host))
            .cloned()
            .collect()
    }
}
