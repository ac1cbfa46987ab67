//! Build step identity.
//!
//! A [`Descriptor`] names one step of the configured build order. Descriptors
//! are compared structurally: any reordering, addition or removal of steps
//! between two builds shows up as a descriptor mismatch and forces a rebuild.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The kind of a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Symbol {
    Graphics,
    #[serde(rename = "EXGRAPHICS")]
    ExGraphics,
    SharedPalettes,
    Overworld,
    TitleScreen,
    Credits,
    #[serde(rename = "GLOBAL_EXANIMATION")]
    GlobalExAnimation,
    TitleMoves,
    Levels,
    BinaryMap16,
    TextMap16,
    ExternalTool,
    Patch,
    Module,
    Pixi,
}

/// Identity of one build step: a [`Symbol`] plus an optional name (external
/// tools, modules) and an optional source path (patches, modules).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub symbol: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Descriptor {
    /// A descriptor with neither name nor path.
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            name: None,
            path: None,
        }
    }

    /// A named descriptor (external tools, PIXI).
    pub fn named(symbol: Symbol, name: impl Into<String>) -> Self {
        Self {
            symbol,
            name: Some(name.into()),
            path: None,
        }
    }

    /// A descriptor identified by a source path (patches).
    pub fn with_path(symbol: Symbol, path: impl Into<PathBuf>) -> Self {
        Self {
            symbol,
            name: None,
            path: Some(path.into()),
        }
    }

    /// A module descriptor. The name doubles as the key into the build
    /// report's module output map and mirrors the source path.
    pub fn module(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            symbol: Symbol::Module,
            name: Some(path.to_string_lossy().into_owned()),
            path: Some(path),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.symbol {
            Symbol::Graphics => "Graphics",
            Symbol::ExGraphics => "ExGraphics",
            Symbol::SharedPalettes => "Shared palettes",
            Symbol::Overworld => "Overworld",
            Symbol::TitleScreen => "Title screen",
            Symbol::Credits => "Credits",
            Symbol::GlobalExAnimation => "Global ExAnimation",
            Symbol::TitleMoves => "Title moves",
            Symbol::Levels => "Levels",
            Symbol::BinaryMap16 => "Binary map16",
            Symbol::TextMap16 => "Text map16",
            Symbol::ExternalTool => "Tool",
            Symbol::Patch => "Patch",
            Symbol::Module => "Module",
            Symbol::Pixi => "PIXI",
        };

        if let Some(path) = &self.path {
            write!(f, "{} '{}'", kind, path.display())
        } else if let Some(name) = &self.name {
            write!(f, "{} '{}'", kind, name)
        } else {
            write!(f, "{}", kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_preserves_identity() {
        let descriptors = vec![
            Descriptor::new(Symbol::Graphics),
            Descriptor::with_path(Symbol::Patch, "patches/a.asm"),
            Descriptor::module("modules/m.asm"),
            Descriptor::named(Symbol::ExternalTool, "gps"),
        ];

        for descriptor in descriptors {
            let json = serde_json::to_string(&descriptor).unwrap();
            let back: Descriptor = serde_json::from_str(&json).unwrap();
            assert_eq!(back, descriptor);
        }
    }

    #[test]
    fn symbols_serialize_to_stable_names() {
        let json = serde_json::to_string(&Symbol::ExGraphics).unwrap();
        assert_eq!(json, "\"EXGRAPHICS\"");
        let json = serde_json::to_string(&Symbol::GlobalExAnimation).unwrap();
        assert_eq!(json, "\"GLOBAL_EXANIMATION\"");
        let json = serde_json::to_string(&Symbol::BinaryMap16).unwrap();
        assert_eq!(json, "\"BINARY_MAP16\"");
    }

    #[test]
    fn equality_is_structural() {
        let a = Descriptor::with_path(Symbol::Patch, "patches/a.asm");
        let b = Descriptor::with_path(Symbol::Patch, "patches/a.asm");
        let c = Descriptor::with_path(Symbol::Patch, "patches/b.asm");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Descriptor::new(Symbol::Patch));
    }

    #[test]
    fn omitted_fields_stay_omitted_in_serialized_form() {
        let json = serde_json::to_string(&Descriptor::new(Symbol::Overworld)).unwrap();
        assert!(!json.contains("name"));
        assert!(!json.contains("path"));
    }
}
