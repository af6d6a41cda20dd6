//! Unit catalog: discoverable external automation units.
//!
//! Entries are immutable value objects. Any implementation (filesystem
//! scan, static manifest, remote registry) can sit behind `CatalogProvider`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CatalogError;

/// One declared parameter of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDetail {
    pub name: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub switch: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParamDetail {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            switch: false,
            allowed_values: Vec::new(),
            default: None,
        }
    }

    /// Catalog notation: `Name*` mandatory, `Flag?` switch,
    /// `Param=a|b|c` allowed values, `Param=default` default value.
    pub fn notation(&self) -> String {
        let mut out = self.name.clone();
        if self.mandatory {
            out.push('*');
        }
        if self.switch {
            out.push('?');
        }
        if !self.allowed_values.is_empty() {
            out.push('=');
            out.push_str(&self.allowed_values.join("|"));
        } else if let Some(default) = self.default.as_deref().filter(|d| !d.is_empty()) {
            out.push('=');
            out.push_str(default);
        }
        out
    }
}

/// How a unit is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// A PowerShell function, dot-sourced with its helpers and splatted.
    #[default]
    Function,
    /// A standalone script or executable, given its arguments as argv.
    Script,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// A unit as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub name: String,
    /// Source file declaring the unit.
    pub path: PathBuf,
    #[serde(default)]
    pub kind: UnitKind,
    /// Empty unless the listing was requested with details.
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub params: Vec<ParamDetail>,
}

/// Full metadata for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub kind: UnitKind,
    /// Every file to load before invoking, in load order.
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub params: Vec<ParamDetail>,
    /// Text of the source's `# Safety:` header, if declared.
    #[serde(default)]
    pub safety: Option<String>,
}

impl UnitInfo {
    /// Mandatory parameters not present in `provided` (case-insensitive).
    pub fn missing_mandatory<'a, I>(&self, provided: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        self.params
            .iter()
            .filter(|p| p.mandatory)
            .filter(|p| {
                !provided
                    .clone()
                    .into_iter()
                    .any(|k| k.trim().eq_ignore_ascii_case(&p.name))
            })
            .map(|p| p.name.clone())
            .collect()
    }

    /// Looks up a declared parameter by case-insensitive name.
    pub fn param(&self, name: &str) -> Option<&ParamDetail> {
        self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Source of unit metadata.
pub trait CatalogProvider: Send + Sync {
    /// Lists units under `base_dir`. With `include_details`, entries carry
    /// their synopsis and parameters.
    fn list_entries(
        &self,
        base_dir: &Path,
        include_details: bool,
    ) -> Result<Vec<UnitEntry>, CatalogError>;

    fn get_info(&self, base_dir: &Path, name: &str) -> Result<UnitInfo, CatalogError>;

    /// Drops anything memoized for `base_dir`. Called after a unit is authored.
    fn invalidate(&self, _base_dir: &Path) {}
}
