// src/recipe/source.rs

//! Package metadata sources
//!
//! The resolver asks a [`RecipeSource`] for recipes by name. Recipes come back
//! parsed, normalized, and validated; missing recipes are `Ok(None)` so the
//! resolver can decide whether absence is fatal for a given edge.

use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use crate::recipe::parser::{parse_recipe, parse_recipe_file, validate_recipe};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of package recipes
pub trait RecipeSource {
    /// Load the recipe for a package, or `None` if no such recipe exists
    fn load(&self, name: &str) -> Result<Option<Arc<Recipe>>>;
}

fn checked(recipe: Recipe) -> Result<Arc<Recipe>> {
    for warning in validate_recipe(&recipe)? {
        debug!("{}: {}", recipe.name(), warning);
    }
    Ok(Arc::new(recipe))
}

/// Recipes stored as `<name>.toml` in a search path of directories
#[derive(Debug, Clone)]
pub struct DirectorySource {
    paths: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// File a recipe would be loaded from, if any
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') || name.starts_with('.') {
            return None;
        }
        self.paths
            .iter()
            .map(|dir| dir.join(format!("{}.toml", name)))
            .find(|path| path.is_file())
    }

    /// Names of all recipes on the search path, first occurrence wins
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dir in &self.paths {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "toml")
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                    && !names.iter().any(|n| n == stem)
                {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl RecipeSource for DirectorySource {
    fn load(&self, name: &str) -> Result<Option<Arc<Recipe>>> {
        let Some(path) = self.locate(name) else {
            return Ok(None);
        };
        debug!("Loading recipe {} from {}", name, path.display());

        let recipe = parse_recipe_file(&path)?;
        if recipe.name() != name {
            warn!(
                "Recipe {} declares package name '{}'",
                path.display(),
                recipe.name()
            );
            return Err(Error::spec(
                name,
                format!("{} declares package '{}'", path.display(), recipe.name()),
            ));
        }
        checked(recipe).map(Some)
    }
}

/// In-process recipe map
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    recipes: HashMap<String, Arc<Recipe>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parsed recipe
    pub fn insert(&mut self, recipe: Recipe) -> Result<()> {
        let recipe = checked(recipe)?;
        self.recipes.insert(recipe.name().to_string(), recipe);
        Ok(())
    }

    /// Parse and add a recipe from TOML text
    pub fn insert_toml(&mut self, content: &str) -> Result<()> {
        self.insert(parse_recipe(content)?)
    }

    /// Builder form of [`MemorySource::insert_toml`]
    pub fn with_toml(mut self, content: &str) -> Result<Self> {
        self.insert_toml(content)?;
        Ok(self)
    }
}

impl RecipeSource for MemorySource {
    fn load(&self, name: &str) -> Result<Option<Arc<Recipe>>> {
        Ok(self.recipes.get(name).cloned())
    }
}
