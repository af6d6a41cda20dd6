//! Filesystem unit catalog.
//!
//! Units live in `<base>/units/`. Every `function Name` declaration in a
//! `.ps1` file is a unit. Files whose name starts with `_` are shared
//! helpers: they are loaded before the declaring file and contribute no
//! units of their own.
//!
//! Any other runnable file (a `.ps1` without functions, `.sh`, and on
//! Windows `.cmd`/`.bat`/`.exe`) is a standalone script unit named after
//! its file stem. When several files share a stem the platform's preferred
//! extension wins, and a script shadows a function of the same name.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use stepwise_core::catalog::{CatalogProvider, ParamDetail, UnitEntry, UnitInfo, UnitKind};
use stepwise_core::error::CatalogError;
use tracing::{debug, warn};

pub const DEFAULT_UNITS_DIR: &str = "units";

const HEADER_BYTES: u64 = 16 * 1024;

/// Script extensions in order of preference; `""` is a bare executable.
#[cfg(windows)]
const SCRIPT_EXTENSIONS: &[&str] = &["ps1", "cmd", "bat", "exe", "sh", "", "out"];
#[cfg(not(windows))]
const SCRIPT_EXTENSIONS: &[&str] = &["sh", "", "out", "ps1"];

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*function[ \t]+([a-z0-9_-]+)").expect("function pattern is valid")
});
static SAFETY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:#|::|rem)[ \t]*safety[ \t]*:[ \t]*(.+?)[ \t]*$").expect("safety pattern is valid")
});
static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bparam\s*\(").expect("param pattern is valid"));
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)").expect("variable pattern is valid"));

/// Anything that can report the files a catalog answer depends on.
pub trait TrackedSources {
    /// The units directory followed by every source file in it.
    fn tracked_paths(&self, base_dir: &Path) -> Vec<PathBuf>;
}

/// `CatalogProvider` over the units directory.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    units_dir: String,
}

impl FsCatalog {
    pub fn new() -> Self {
        Self::with_units_dir(DEFAULT_UNITS_DIR)
    }

    pub fn with_units_dir(units_dir: impl Into<String>) -> Self {
        Self {
            units_dir: units_dir.into(),
        }
    }

    pub fn units_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.units_dir)
    }

    /// Candidate unit files sorted by name. A missing directory is an
    /// empty catalog.
    pub fn source_files(&self, base_dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
        let dir = self.units_path(base_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && extension_rank(p).is_some())
            .collect();
        files.sort();
        Ok(files)
    }

    fn scan(&self, base_dir: &Path) -> Result<Scan, CatalogError> {
        let mut scan = Scan::default();
        let mut scripts: Vec<Located> = Vec::new();
        for path in self.source_files(base_dir)? {
            let helper = is_helper(&path);
            if !has_ps1_extension(&path) {
                if !helper {
                    scripts.push(parse_script(&path, &read_header(&path)?));
                }
                continue;
            }
            let text = read_lossy(&path)?;
            let file = parse_source(&path, &text);
            if helper {
                scan.helpers.push(file.path);
            } else if file.units.is_empty() {
                scripts.push(parse_script(&path, &text));
            } else {
                for unit in file.units {
                    scan.units.push(Located {
                        path: file.path.clone(),
                        safety: file.safety.clone(),
                        unit,
                    });
                }
            }
        }

        let scripts = preferred_scripts(scripts);
        scan.units.retain(|function| {
            let shadowed = scripts.iter().any(|s| s.unit.name.eq_ignore_ascii_case(&function.unit.name));
            if shadowed {
                debug!(unit = %function.unit.name, "Function shadowed by a script of the same name");
            }
            !shadowed
        });
        scan.units.extend(scripts);
        Ok(scan)
    }
}

impl Default for FsCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedSources for FsCatalog {
    fn tracked_paths(&self, base_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![self.units_path(base_dir)];
        match self.source_files(base_dir) {
            Ok(files) => paths.extend(files),
            Err(e) => warn!(error = %e, "Cannot list unit sources for fingerprint"),
        }
        paths
    }
}

impl CatalogProvider for FsCatalog {
    fn list_entries(
        &self,
        base_dir: &Path,
        include_details: bool,
    ) -> Result<Vec<UnitEntry>, CatalogError> {
        let entries: Vec<UnitEntry> = self
            .scan(base_dir)?
            .units
            .into_iter()
            .map(|located| {
                let unit = located.unit;
                let (synopsis, params) = if include_details {
                    (unit.synopsis, unit.params)
                } else {
                    (String::new(), Vec::new())
                };
                UnitEntry {
                    name: unit.name,
                    path: located.path,
                    kind: unit.kind,
                    synopsis,
                    params,
                }
            })
            .collect();
        debug!(count = entries.len(), details = include_details, "Listed units");
        Ok(entries)
    }

    fn get_info(&self, base_dir: &Path, name: &str) -> Result<UnitInfo, CatalogError> {
        let Scan { helpers, units } = self.scan(base_dir)?;
        let located = units
            .into_iter()
            .find(|l| l.unit.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| CatalogError::NotFound(name.trim().to_string()))?;

        let Located { path, safety, unit } = located;
        let sources = match unit.kind {
            UnitKind::Function => helpers.into_iter().chain([path.clone()]).collect(),
            UnitKind::Script => vec![path.clone()],
        };
        Ok(UnitInfo {
            name: unit.name,
            path,
            kind: unit.kind,
            sources,
            synopsis: unit.synopsis,
            params: unit.params,
            safety,
        })
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn read_lossy(path: &Path) -> Result<String, CatalogError> {
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Leading text of a script or binary; only its header comments matter.
fn read_header(path: &Path) -> Result<String, CatalogError> {
    let mut bytes = Vec::new();
    fs::File::open(path)
        .and_then(|file| file.take(HEADER_BYTES).read_to_end(&mut bytes))
        .map_err(|e| io_error(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn has_ps1_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ps1"))
}

fn is_helper(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('_'))
}

/// Position of the file's extension in the preference list, or `None` when
/// the file cannot be a unit.
fn extension_rank(path: &Path) -> Option<usize> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let rank = SCRIPT_EXTENSIONS.iter().position(|candidate| *candidate == ext)?;
    if matches!(ext.as_str(), "" | "out") && !is_executable(path) {
        return None;
    }
    Some(rank)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// One script per name, picking the preferred extension.
fn preferred_scripts(scripts: Vec<Located>) -> Vec<Located> {
    let mut kept: Vec<Located> = Vec::with_capacity(scripts.len());
    for script in scripts {
        let rank = extension_rank(&script.path);
        match kept
            .iter_mut()
            .find(|k| k.unit.name.eq_ignore_ascii_case(&script.unit.name))
        {
            Some(existing) if rank < extension_rank(&existing.path) => *existing = script,
            Some(_) => {}
            None => kept.push(script),
        }
    }
    kept
}

#[derive(Debug, Default)]
struct Scan {
    helpers: Vec<PathBuf>,
    units: Vec<Located>,
}

#[derive(Debug)]
struct Located {
    path: PathBuf,
    safety: Option<String>,
    unit: ParsedUnit,
}

#[derive(Debug)]
struct ParsedFile {
    path: PathBuf,
    safety: Option<String>,
    units: Vec<ParsedUnit>,
}

#[derive(Debug)]
struct ParsedUnit {
    name: String,
    kind: UnitKind,
    synopsis: String,
    params: Vec<ParamDetail>,
}

fn safety_header(text: &str) -> Option<String> {
    SAFETY_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn parse_source(path: &Path, text: &str) -> ParsedFile {
    let declarations: Vec<(usize, String)> = FUNCTION_RE
        .captures_iter(text)
        .filter_map(|c| Some((c.get(0)?.start(), c.get(1)?.as_str().to_string())))
        .collect();

    let header_end = declarations.first().map_or(text.len(), |(start, _)| *start);
    let safety = safety_header(&text[..header_end]);

    let mut units = Vec::with_capacity(declarations.len());
    for (i, (start, name)) in declarations.iter().enumerate() {
        let end = declarations.get(i + 1).map_or(text.len(), |(next, _)| *next);
        let body = &text[*start..end];
        let leading = leading_comment(&text[..*start]);
        let synopsis = synopsis(body).or_else(|| synopsis(&leading)).unwrap_or_default();
        let code = strip_comments(body);
        units.push(ParsedUnit {
            name: name.clone(),
            kind: UnitKind::Function,
            synopsis,
            params: param_block(&code).map(parse_params).unwrap_or_default(),
        });
    }

    ParsedFile {
        path: path.to_path_buf(),
        safety,
        units,
    }
}

/// A standalone script: the stem is the unit name. PowerShell scripts may
/// declare a top-level `param(...)` block.
fn parse_script(path: &Path, text: &str) -> Located {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let params = if has_ps1_extension(path) {
        param_block(&strip_comments(text)).map(parse_params).unwrap_or_default()
    } else {
        Vec::new()
    };
    Located {
        path: path.to_path_buf(),
        safety: safety_header(text),
        unit: ParsedUnit {
            name,
            kind: UnitKind::Script,
            synopsis: synopsis(text).unwrap_or_default(),
            params,
        },
    }
}

/// Comment lines directly above a declaration, in source order.
fn leading_comment(before: &str) -> String {
    let mut lines = Vec::new();
    let mut in_block = false;
    for line in before.lines().rev() {
        let trimmed = line.trim();
        if in_block {
            lines.push(trimmed);
            if trimmed.starts_with("<#") {
                in_block = false;
            }
            continue;
        }
        if trimmed.ends_with("#>") {
            lines.push(trimmed);
            in_block = !trimmed.starts_with("<#");
        } else if trimmed.starts_with('#') {
            lines.push(trimmed);
        } else if !trimmed.is_empty() {
            break;
        }
    }
    lines.reverse();
    lines.join("\n")
}

/// First text line after a `.SYNOPSIS` help keyword.
fn synopsis(text: &str) -> Option<String> {
    let mut lines = text.lines().map(|l| l.trim().trim_start_matches('#').trim());
    lines.find(|l| l.eq_ignore_ascii_case(".synopsis"))?;
    lines
        .find(|l| !l.is_empty())
        .filter(|l| !l.starts_with('.') && !l.starts_with('>'))
        .map(str::to_string)
}

/// Blanks out `# line` and `<# block #>` comments outside quotes. Line
/// breaks are kept.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '<' if chars.peek() == Some(&'#') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '#' && c == '>' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Inner text of the first `param(...)` block. Expects comment-free code.
fn param_block(body: &str) -> Option<&str> {
    let open = PARAM_RE.find(body)?.end();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    for (offset, c) in body[open..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[open..open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas outside brackets and quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_params(block: &str) -> Vec<ParamDetail> {
    split_top_level(block)
        .into_iter()
        .filter_map(parse_param)
        .collect()
}

fn parse_param(raw: &str) -> Option<ParamDetail> {
    let cleaned = raw.lines().collect::<Vec<_>>().join(" ");
    let mut rest = cleaned.trim();
    let mut attributes = Vec::new();
    while rest.starts_with('[') {
        let end = matching_bracket(rest)?;
        attributes.push(&rest[1..end]);
        rest = rest[end + 1..].trim_start();
    }

    let name = VARIABLE_RE.captures(rest)?.get(1)?.as_str().to_string();
    let default = rest
        .split_once('=')
        .map(|(_, v)| unquote(v.trim()))
        .filter(|v| !v.is_empty());

    let mut param = ParamDetail::new(name);
    param.default = default;
    for attr in attributes {
        let lower = attr.trim().to_ascii_lowercase();
        if lower == "switch" {
            param.switch = true;
        } else if lower.starts_with("parameter") {
            param.mandatory = declares_mandatory(&lower);
        } else if lower.starts_with("validateset") {
            if let Some(inner) = attr.find('(').zip(attr.rfind(')')).map(|(a, b)| &attr[a + 1..b]) {
                param.allowed_values = split_top_level(inner)
                    .into_iter()
                    .map(|v| unquote(v.trim()))
                    .filter(|v| !v.is_empty())
                    .collect();
            }
        }
    }
    Some(param)
}

fn matching_bracket(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `Mandatory`, `Mandatory=$true` and `Mandatory = 1` count; `$false` does not.
fn declares_mandatory(attr: &str) -> bool {
    let Some(pos) = attr.find("mandatory") else {
        return false;
    };
    let after = attr[pos + "mandatory".len()..].trim_start();
    match after.strip_prefix('=') {
        Some(value) => {
            let value = value.trim_start();
            !(value.starts_with("$false") || value.starts_with('0'))
        }
        None => true,
    }
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    for q in ['\'', '"'] {
        if let Some(inner) = trimmed.strip_prefix(q).and_then(|t| t.strip_suffix(q)) {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}
