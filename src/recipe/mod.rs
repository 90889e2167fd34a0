// src/recipe/mod.rs

//! Recipes: declarative descriptions of how to build one package
//!
//! A recipe names a package, gives source locations for its variants
//! (stable, devel, head), declares build options and dependency edges, carries
//! patches, and describes the build procedure.
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "wireshark"
//!
//! [source.stable]
//! version = "1.10.6"
//! url = "https://www.wireshark.org/download/src/wireshark-%(version)s.tar.bz2"
//! checksum = "sha256:..."
//!
//! [[options]]
//! name = "with-qt"
//! description = "Use QT for GUI instead of GTK+"
//! conflicts = ["with-x"]
//!
//! [[dependencies]]
//! name = "geoip"
//! kind = "recommended"
//!
//! [build]
//! strategy = "autotools"
//! serial_install = true
//!
//! [[test.steps]]
//! program = "%(prefix)s/bin/capinfos"
//! args = ["-v"]
//! ```

pub mod format;
pub mod parser;
pub mod source;
pub mod template;

pub use format::{
    BuildSection, DependencyDecl, EdgeKind, OptionDecl, PatchDecl, Phase, Recipe, SourceLocation,
    StepDecl, StrategyKind, TestSection, TestStep, Variant, Vcs, normalize_option_name,
};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
pub use source::{DirectorySource, MemorySource, RecipeSource};
pub use template::TemplateVars;
