// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files that describe how to obtain, configure, build, and
//! install one package, including its source variants, build options,
//! dependency edges, and patches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A complete recipe for building a package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package metadata
    pub package: PackageSection,

    /// Source locations per variant
    pub source: SourceSection,

    /// Declared build options
    #[serde(default)]
    pub options: Vec<OptionDecl>,

    /// Dependency edges
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,

    /// Patches, applied in declaration order
    #[serde(default)]
    pub patches: Vec<PatchDecl>,

    /// Build instructions
    #[serde(default)]
    pub build: BuildSection,

    /// Variables for template substitution
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Text shown to the user after a successful install
    #[serde(default)]
    pub caveats: Option<String>,

    /// Smoke test run against an installed keg
    #[serde(default)]
    pub test: TestSection,
}

impl Recipe {
    /// Package name
    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// Source location for a variant, if the recipe declares one
    pub fn source_for(&self, variant: Variant) -> Option<&SourceLocation> {
        match variant {
            Variant::Stable => Some(&self.source.stable),
            Variant::Devel => self.source.devel.as_ref(),
            Variant::Head => self.source.head.as_ref(),
        }
    }

    /// Version string of a variant
    pub fn version_for(&self, variant: Variant) -> Option<&str> {
        self.source_for(variant).map(|s| s.version.as_str())
    }

    /// Variants this recipe can be built from
    pub fn variants(&self) -> Vec<Variant> {
        Variant::ALL
            .into_iter()
            .filter(|v| self.source_for(*v).is_some())
            .collect()
    }

    /// Look up a declared option by name
    pub fn option(&self, name: &str) -> Option<&OptionDecl> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Patches that apply to a variant, in declaration order
    pub fn patches_for(&self, variant: Variant) -> impl Iterator<Item = &PatchDecl> {
        self.patches
            .iter()
            .filter(move |p| p.variant.is_none_or(|v| v == variant))
    }

    /// Strip `with-`/`without-` prefixes from option names and references
    ///
    /// Recipes may spell options the way users type them on the command line;
    /// internally every option is stored under its bare name.
    pub fn normalize(&mut self) {
        for option in &mut self.options {
            option.name = normalize_option_name(&option.name);
            for conflict in &mut option.conflicts {
                *conflict = normalize_option_name(conflict);
            }
        }
        for dep in &mut self.dependencies {
            if let Some(when) = &dep.when {
                dep.when = Some(normalize_option_name(when));
            }
            for option in &mut dep.options {
                *option = normalize_option_name(option);
            }
        }
        for step in &mut self.build.steps {
            if let Some(when) = &step.when {
                step.when = Some(normalize_option_name(when));
            }
            if let Some(unless) = &step.unless {
                step.unless = Some(normalize_option_name(unless));
            }
        }
    }
}

/// Bare option name for a user- or recipe-supplied spelling
pub fn normalize_option_name(name: &str) -> String {
    let name = name.trim().trim_start_matches("--");
    name.strip_prefix("without-")
        .or_else(|| name.strip_prefix("with-"))
        .unwrap_or(name)
        .to_string()
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Package name
    pub name: String,

    /// Short description
    #[serde(default)]
    pub description: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,
}

/// Source variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Stable,
    Devel,
    Head,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Stable, Variant::Devel, Variant::Head];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Stable => "stable",
            Variant::Devel => "devel",
            Variant::Head => "head",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source locations, one per variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Stable release (always present)
    pub stable: SourceLocation,

    /// Development release
    #[serde(default)]
    pub devel: Option<SourceLocation>,

    /// Tip of development, usually a VCS checkout
    #[serde(default)]
    pub head: Option<SourceLocation>,
}

/// Where one variant's source comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Version identifier of this variant
    pub version: String,

    /// Primary URL
    ///
    /// Supports `%(version)s` substitution.
    pub url: String,

    /// Fallback URLs, tried in order after the primary
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Integrity checksum (`sha256:...`); required unless `vcs` is set
    #[serde(default)]
    pub checksum: Option<String>,

    /// Version control system for checkouts
    #[serde(default)]
    pub vcs: Option<Vcs>,

    /// Branch to check out
    #[serde(default)]
    pub branch: Option<String>,
}

impl SourceLocation {
    /// Primary URL followed by mirrors, with `%(version)s` substituted
    pub fn urls(&self) -> Vec<String> {
        std::iter::once(&self.url)
            .chain(self.mirrors.iter())
            .map(|u| u.replace("%(version)s", &self.version))
            .collect()
    }

    /// Filename of the primary URL
    pub fn filename(&self) -> String {
        let url = self.url.replace("%(version)s", &self.version);
        url.split('/')
            .next_back()
            .filter(|s| !s.is_empty())
            .unwrap_or("source.tar.gz")
            .to_string()
    }
}

/// Supported version control systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vcs {
    Git,
}

/// A declared build option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDecl {
    /// Option name (`x`, or `with-x` which is normalized to `x`)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Enabled when no flag says otherwise
    #[serde(default)]
    pub default: bool,

    /// Options that may not be enabled together with this one
    #[serde(default)]
    pub conflicts: Vec<String>,

    /// Toolchain arguments emitted when enabled
    #[serde(default)]
    pub on_args: Vec<String>,

    /// Toolchain arguments emitted when disabled
    #[serde(default)]
    pub off_args: Vec<String>,
}

/// Dependency edge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Needed only to build
    Build,
    /// Always needed
    #[default]
    Required,
    /// Enabled by default, declinable with `--without-<dep>`
    Recommended,
    /// Disabled by default, enabled with `--with-<dep>`
    Optional,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Build => "build",
            EdgeKind::Required => "required",
            EdgeKind::Recommended => "recommended",
            EdgeKind::Optional => "optional",
        }
    }

    /// Whether this kind implicitly declares an option named after the target
    pub fn declares_option(&self) -> bool {
        matches!(self, EdgeKind::Recommended | EdgeKind::Optional)
    }

    /// Default of the implicitly declared option
    pub fn default_enabled(&self) -> bool {
        !matches!(self, EdgeKind::Optional)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDecl {
    /// Target package
    pub name: String,

    /// Edge kind
    #[serde(default)]
    pub kind: EdgeKind,

    /// Option of the depending package that gates this edge
    #[serde(default)]
    pub when: Option<String>,

    /// Edge only exists for this source variant
    #[serde(default)]
    pub variant: Option<Variant>,

    /// Options the target must be built with
    #[serde(default)]
    pub options: Vec<String>,

    /// Feature name for `--with-<feature>=<path>` / `--without-<feature>`
    #[serde(default)]
    pub configure_with: Option<String>,
}

impl DependencyDecl {
    /// Options of the depending package that must all be enabled for this
    /// edge to be active
    pub fn gates(&self) -> Vec<&str> {
        let mut gates = Vec::new();
        if let Some(when) = &self.when {
            gates.push(when.as_str());
        }
        if self.kind.declares_option() {
            gates.push(self.name.as_str());
        }
        gates
    }

    /// Whether the edge exists at all for a variant
    pub fn applies_to(&self, variant: Variant) -> bool {
        self.variant.is_none_or(|v| v == variant)
    }
}

/// A patch declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDecl {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Embedded unified diff
    #[serde(default)]
    pub inline: Option<String>,

    /// Remote unified diff
    #[serde(default)]
    pub url: Option<String>,

    /// Checksum of the remote diff
    #[serde(default)]
    pub checksum: Option<String>,

    /// Leading path components to strip (default: 1)
    #[serde(default = "default_strip")]
    pub strip: usize,

    /// Only apply for this variant
    #[serde(default)]
    pub variant: Option<Variant>,
}

fn default_strip() -> usize {
    1
}

impl PatchDecl {
    /// Label used in logs and errors
    pub fn label(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(url) = &self.url
            && let Some(file) = url.split('/').next_back()
            && !file.is_empty()
        {
            return file.to_string();
        }
        format!("patch #{}", index + 1)
    }
}

/// How a package is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// `./configure && make && make install`
    #[default]
    Autotools,
    /// Explicit program invocations from `steps`
    Direct,
    /// A shell script run once per phase with `$FORMULARY_PHASE` set
    Script,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Autotools => "autotools",
            StrategyKind::Direct => "direct",
            StrategyKind::Script => "script",
        }
    }
}

/// Build phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Configure,
    Build,
    Install,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Configure, Phase::Build, Phase::Install];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Configure => "configure",
            Phase::Build => "build",
            Phase::Install => "install",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build instructions section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildSection {
    /// Build strategy, selected explicitly
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Extra arguments for the autotools configure step
    #[serde(default)]
    pub configure_args: Vec<String>,

    /// Job cap for the build step (default: unrestricted)
    #[serde(default)]
    pub jobs: Option<u32>,

    /// Force the build step to a single job
    #[serde(default)]
    pub serial_build: bool,

    /// Force the install step to a single job
    ///
    /// Independent of the build step's setting; some projects build fine in
    /// parallel but race during `make install`.
    #[serde(default)]
    pub serial_install: bool,

    /// Environment variables for every step
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Explicit steps (direct strategy, or additions for autotools)
    #[serde(default)]
    pub steps: Vec<StepDecl>,

    /// Script body for the script strategy
    #[serde(default)]
    pub script: Option<String>,

    /// Commands run before configure when building the head variant
    #[serde(default)]
    pub head_bootstrap: Vec<String>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Working directory within the source tree
    #[serde(default)]
    pub workdir: Option<String>,
}

/// One explicit toolchain invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecl {
    /// Phase the step runs in
    pub phase: Phase,

    /// Program to execute
    pub program: String,

    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,

    /// Only run when this option is enabled
    #[serde(default)]
    pub when: Option<String>,

    /// Only run when this option is disabled
    #[serde(default)]
    pub unless: Option<String>,

    /// Only run for this variant
    #[serde(default)]
    pub variant: Option<Variant>,

    /// Force this step to a single job
    #[serde(default)]
    pub serial: bool,
}

/// Post-install smoke test
///
/// Steps run in a scratch directory with `%(prefix)s` naming the linked keg.
/// A step passes when it exits 0 and, if `expect_stdout` is given, prints
/// exactly that.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestSection {
    #[serde(default)]
    pub steps: Vec<TestStep>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TestSection {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One smoke-test command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStep {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Exact standard output the step must produce
    #[serde(default)]
    pub expect_stdout: Option<String>,
}
