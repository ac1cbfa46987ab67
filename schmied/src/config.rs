//! Project configuration.
//!
//! The manifest is a YAML document. Typed fields drive the engine; the raw
//! document is kept alongside so configuration dependencies can look up any
//! key by its dotted path and compare canonical stringifications across
//! builds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::descriptor::{Descriptor, Symbol};
use crate::error::ConfigError;

/// Scope of write-conflict detection during full builds. When the manifest
/// does not pick one, the default is derived from whether a conflict log
/// file is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// No conflict detection.
    None,
    /// Only addresses covered by patch hijacks are checked.
    Hijacks,
    /// Every written address is checked.
    All,
}

impl ConflictPolicy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "none" => Ok(Self::None),
            "hijacks" => Ok(Self::Hijacks),
            "all" => Ok(Self::All),
            other => Err(ConfigError::UnknownConflictPolicy(other.to_string())),
        }
    }
}

/// A user-configured external tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub executable: PathBuf,
    #[serde(default)]
    pub options: Vec<String>,
    /// Whether the working ROM path is appended to the invocation.
    #[serde(default = "default_true")]
    pub pass_rom: bool,
    /// Resource paths the tool always depends on.
    #[serde(default)]
    pub static_dependencies: Vec<PathBuf>,
    /// File the tool writes its consumed input paths to, one per line. Tools
    /// without one opt out of dependency reporting.
    #[serde(default)]
    pub dependency_report: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    project_root: Option<PathBuf>,
    base_rom: PathBuf,
    output_rom: PathBuf,
    temporary_folder: PathBuf,
    #[serde(default)]
    rom_size: Option<u64>,
    #[serde(default)]
    levels: Option<PathBuf>,
    build_order: Vec<String>,
    #[serde(default)]
    editor: Option<PathBuf>,
    #[serde(default)]
    assembler: Option<PathBuf>,
    #[serde(default)]
    module_output: Option<PathBuf>,
    #[serde(default)]
    conflicts: Option<String>,
    #[serde(default)]
    conflict_log: Option<PathBuf>,
    #[serde(default)]
    tools: BTreeMap<String, ToolConfig>,
}

/// Typed view of the project manifest consumed by the engine. No field is
/// mutated after loading.
#[derive(Debug, Clone)]
pub struct Configuration {
    raw: serde_yaml::Value,
    pub project_root: PathBuf,
    pub base_rom: PathBuf,
    pub output_rom: PathBuf,
    pub temporary_folder: PathBuf,
    pub rom_size: Option<u64>,
    pub levels: Option<PathBuf>,
    pub build_order: Vec<Descriptor>,
    pub editor: PathBuf,
    pub assembler: PathBuf,
    pub module_output: PathBuf,
    pub conflict_policy: ConflictPolicy,
    pub conflict_log: Option<PathBuf>,
    pub tools: BTreeMap<String, ToolConfig>,
}

impl Configuration {
    /// Load a manifest file. Relative paths resolve against the manifest's
    /// directory unless `project_root` overrides it.
    pub fn load(manifest_path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(manifest_path).map_err(|source| ConfigError::Io {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let default_root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_str(&text, &default_root)
    }

    /// Parse a manifest from a YAML string with `default_root` as the
    /// fallback project root.
    pub fn from_str(text: &str, default_root: &Path) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)?;
        let manifest: Manifest = serde_yaml::from_value(raw.clone())?;

        let project_root = manifest
            .project_root
            .map(|root| resolve(default_root, root))
            .unwrap_or_else(|| default_root.to_path_buf());

        let build_order = manifest
            .build_order
            .iter()
            .map(|token| parse_build_order_token(token))
            .collect::<Result<Vec<_>, _>>()?;

        let conflict_policy = match manifest.conflicts.as_deref() {
            Some(value) => ConflictPolicy::parse(value)?,
            None if manifest.conflict_log.is_some() => ConflictPolicy::All,
            None => ConflictPolicy::None,
        };

        Ok(Self {
            base_rom: resolve(&project_root, manifest.base_rom),
            output_rom: resolve(&project_root, manifest.output_rom),
            temporary_folder: resolve(&project_root, manifest.temporary_folder),
            rom_size: manifest.rom_size,
            levels: manifest.levels.map(|p| resolve(&project_root, p)),
            build_order,
            editor: manifest.editor.unwrap_or_else(|| "lunar-magic".into()),
            assembler: manifest.assembler.unwrap_or_else(|| "asar".into()),
            module_output: resolve(
                &project_root,
                manifest.module_output.unwrap_or_else(|| "module_output".into()),
            ),
            conflict_policy,
            conflict_log: manifest.conflict_log.map(|p| resolve(&project_root, p)),
            tools: manifest.tools,
            project_root,
            raw,
        })
    }

    /// Canonical stringification of the value at a dotted key path, or
    /// `None` if any segment is unset.
    pub fn get_by_key(&self, key_path: &str) -> Option<String> {
        let mut current = &self.raw;
        for segment in key_path.split('.') {
            current = current.get(segment)?;
        }
        canonical_value(current)
    }
}

fn resolve(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn canonical_value(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        other => serde_yaml::to_string(other)
            .ok()
            .map(|s| s.trim_end().to_string()),
    }
}

/// Parse one build order entry. Plain words name fixed steps; `patch:`,
/// `module:` and `tool:` prefixes carry a payload.
pub fn parse_build_order_token(token: &str) -> Result<Descriptor, ConfigError> {
    if let Some(path) = token.strip_prefix("patch:") {
        return Ok(Descriptor::with_path(Symbol::Patch, path));
    }
    if let Some(path) = token.strip_prefix("module:") {
        return Ok(Descriptor::module(path));
    }
    if let Some(name) = token.strip_prefix("tool:") {
        return Ok(Descriptor::named(Symbol::ExternalTool, name));
    }

    let symbol = match token {
        "graphics" => Symbol::Graphics,
        "exgraphics" => Symbol::ExGraphics,
        "shared_palettes" => Symbol::SharedPalettes,
        "overworld" => Symbol::Overworld,
        "title_screen" => Symbol::TitleScreen,
        "credits" => Symbol::Credits,
        "global_exanimation" => Symbol::GlobalExAnimation,
        "title_moves" => Symbol::TitleMoves,
        "levels" => Symbol::Levels,
        "binary_map16" => Symbol::BinaryMap16,
        "text_map16" => Symbol::TextMap16,
        "pixi" => Symbol::Pixi,
        other => return Err(ConfigError::UnknownBuildOrderEntry(other.to_string())),
    };
    Ok(Descriptor::new(symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
base_rom: clean.sfc
output_rom: out/hack.sfc
temporary_folder: .tmp
rom_size: 4194304
levels: levels
build_order:
  - graphics
  - levels
  - "patch:patches/a.asm"
  - "module:modules/m.asm"
  - "tool:gps"
tools:
  gps:
    executable: tools/gps
    options: ["-l", "list.txt"]
"#;

    #[test]
    fn typed_fields_resolve_against_project_root() {
        let config = Configuration::from_str(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(config.project_root, Path::new("/proj"));
        assert_eq!(config.base_rom, Path::new("/proj/clean.sfc"));
        assert_eq!(config.output_rom, Path::new("/proj/out/hack.sfc"));
        assert_eq!(config.levels.as_deref(), Some(Path::new("/proj/levels")));
        assert_eq!(config.rom_size, Some(4_194_304));
    }

    #[test]
    fn build_order_tokens_parse_to_descriptors() {
        let config = Configuration::from_str(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(config.build_order.len(), 5);
        assert_eq!(config.build_order[0], Descriptor::new(Symbol::Graphics));
        assert_eq!(
            config.build_order[2],
            Descriptor::with_path(Symbol::Patch, "patches/a.asm")
        );
        assert_eq!(config.build_order[3], Descriptor::module("modules/m.asm"));
        assert_eq!(
            config.build_order[4],
            Descriptor::named(Symbol::ExternalTool, "gps")
        );
    }

    #[test]
    fn unknown_build_order_entry_is_rejected() {
        let text = MANIFEST.replace("- graphics", "- jetpack");
        let error = Configuration::from_str(&text, Path::new("/proj")).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownBuildOrderEntry(e) if e == "jetpack"));
    }

    #[test]
    fn dotted_lookup_reaches_nested_keys() {
        let config = Configuration::from_str(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(
            config.get_by_key("tools.gps.executable").as_deref(),
            Some("tools/gps")
        );
        assert_eq!(config.get_by_key("rom_size").as_deref(), Some("4194304"));
        assert_eq!(config.get_by_key("tools.pixi.executable"), None);
        assert_eq!(config.get_by_key("nonsense"), None);
    }

    #[test]
    fn conflict_policy_default_follows_the_log_file() {
        // no conflicts key and no log file configured: detection is off
        let config = Configuration::from_str(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::None);

        // a configured log file turns full detection on
        let text = format!("{MANIFEST}conflict_log: conflicts.txt\n");
        let config = Configuration::from_str(&text, Path::new("/proj")).unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::All);

        // an explicit setting wins over the derivation
        let text = format!("{MANIFEST}conflicts: hijacks\nconflict_log: conflicts.txt\n");
        let config = Configuration::from_str(&text, Path::new("/proj")).unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::Hijacks);
    }

    #[test]
    fn sequences_stringify_canonically() {
        let config = Configuration::from_str(MANIFEST, Path::new("/proj")).unwrap();
        let first = config.get_by_key("tools.gps.options").unwrap();
        let again = config.get_by_key("tools.gps.options").unwrap();
        assert_eq!(first, again);
        assert!(first.contains("list.txt"));
    }
}
