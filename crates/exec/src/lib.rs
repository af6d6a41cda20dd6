//! Execution harness for Stepwise.
//!
//! Runs built-in tools and external PowerShell units under a wall-clock
//! timeout, and provides the filesystem unit catalog with its
//! fingerprint-validated cache.

pub mod catalog;
pub mod catalog_cache;
pub mod cleanup;
pub mod diagnostics;
pub mod harness;
pub mod invocation;
pub mod script;

pub use catalog::{FsCatalog, TrackedSources};
pub use catalog_cache::{CachedCatalog, CatalogCache, Fingerprint};
pub use cleanup::{CleanupRegistry, TempScript};
pub use diagnostics::friendly_error;
pub use harness::{Harness, UnitRunner};
pub use invocation::{ArgValue, Invocation, split_splat_args};
pub use script::{build_invocation_script, ps_quote};
