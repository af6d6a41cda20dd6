//! Built-in tool implementations for Stepwise.
//!
//! Tools give the agent direct access to the local filesystem without an
//! external unit: find files, list recent ones, and clean up empty
//! folders. Listings are paged and can be continued.

pub mod clean;
pub mod files;
pub mod paging;
pub mod recent;
pub mod search;

use stepwise_core::tool::ToolRegistry;

pub use clean::CleanTool;
pub use recent::RecentTool;
pub use search::SearchTool;

/// Create a registry with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchTool::new()));
    registry.register(Box::new(RecentTool::new()));
    registry.register(Box::new(CleanTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_catalog() {
        let registry = default_registry();
        let catalog = registry.catalog();
        let lines: Vec<&str> = catalog.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("- clean(base, apply): "));
        assert!(lines[1].starts_with("- recent(base, ext, limit, offset): "));
        assert!(lines[2].starts_with("- search(base, name, ext, sort, limit, offset): "));
    }
}
