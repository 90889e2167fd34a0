// src/kitchen/env.rs

//! Build environment overlay
//!
//! Steps never touch the process environment. Each invocation carries an
//! [`EnvOverlay`] that is applied on top of the inherited environment of the
//! child only. Overlays are immutable; [`EnvOverlay::with`] returns a new one.

use crate::recipe::Variant;
use crate::resolver::PlanEntry;
use std::collections::BTreeMap;
use std::path::Path;

/// Marker set for head builds
pub const HEAD_MARKER: &str = "FORMULARY_HEAD";

/// Phase name exported to script builds
pub const PHASE_VAR: &str = "FORMULARY_PHASE";

/// Environment variables layered over the inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this overlay with one variable set
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(key.into(), value.into());
        Self { vars }
    }

    /// Copy of this overlay with several variables set
    #[must_use]
    pub fn with_all<I, K, V>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.vars.clone();
        vars.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Base overlay for building one plan entry
    ///
    /// Search paths point at the linked location of every active dependency
    /// under the shared prefix. The recipe's own environment comes last and
    /// wins over the derived values.
    pub fn for_package(entry: &PlanEntry, shared_prefix: &Path) -> Self {
        let dep_roots: Vec<_> = entry
            .dependencies
            .iter()
            .map(|d| shared_prefix.join(&d.name))
            .collect();

        let mut overlay = Self::new();

        if !dep_roots.is_empty() {
            let bins: Vec<String> = dep_roots
                .iter()
                .map(|r| r.join("bin").display().to_string())
                .collect();
            let inherited = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
            overlay = overlay
                .with("PATH", format!("{}:{}", bins.join(":"), inherited))
                .with(
                    "PKG_CONFIG_PATH",
                    join_paths(&dep_roots, "lib/pkgconfig", ":"),
                )
                .with("CPPFLAGS", prefixed(&dep_roots, "-I", "include"))
                .with("LDFLAGS", prefixed(&dep_roots, "-L", "lib"));
        }

        if entry.variant == Variant::Head {
            overlay = overlay.with(HEAD_MARKER, "1");
        }

        overlay.with_all(entry.recipe.build.environment.clone())
    }
}

fn join_paths(roots: &[std::path::PathBuf], sub: &str, sep: &str) -> String {
    roots
        .iter()
        .map(|r| r.join(sub).display().to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

fn prefixed(roots: &[std::path::PathBuf], flag: &str, sub: &str) -> String {
    roots
        .iter()
        .map(|r| format!("{}{}", flag, r.join(sub).display()))
        .collect::<Vec<_>>()
        .join(" ")
}
