// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Catalog loading and validation.

use crate::types::Recipe;
use crate::RecipeError;
use indexmap::IndexMap;
use std::path::Path;

/// The shipped catalog: the three canonical recipes.
const DEFAULT_CATALOG: &str = include_str!("recipes.json");

/// A validated set of recipes, keyed by id in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    recipes: IndexMap<String, Recipe>,
}

impl Catalog {
    /// The embedded default catalog.
    ///
    /// Infallible by construction; the embedded document is covered by tests.
    pub fn shipped() -> Result<Self, RecipeError> {
        Self::load_str(DEFAULT_CATALOG)
    }

    /// Load a catalog from a serialized JSON document (an array of recipes).
    pub fn load_str(text: &str) -> Result<Self, RecipeError> {
        // Deserializing straight from the text (not via an intermediate
        // `Value`) keeps each recipe's input declaration order.
        if !text.trim_start().starts_with('[') {
            return Err(RecipeError::NotAnArray);
        }
        let entries: Vec<Recipe> = serde_json::from_str(text)?;

        let mut recipes = IndexMap::new();
        for recipe in entries {
            validate_recipe(&recipe)?;
            if recipes.contains_key(&recipe.id) {
                return Err(RecipeError::DuplicateRecipe(recipe.id));
            }
            tracing::debug!(recipe = %recipe.id, steps = recipe.steps.len(), "loaded recipe");
            recipes.insert(recipe.id.clone(), recipe);
        }

        Ok(Self { recipes })
    }

    /// Load a catalog document from disk.
    pub fn load_file(path: &Path) -> Result<Self, RecipeError> {
        let text = std::fs::read_to_string(path)?;
        Self::load_str(&text)
    }

    pub fn get(&self, recipe_id: &str) -> Option<&Recipe> {
        self.recipes.get(recipe_id)
    }

    pub fn require(&self, recipe_id: &str) -> Result<&Recipe, RecipeError> {
        self.get(recipe_id)
            .ok_or_else(|| RecipeError::UnknownRecipe(recipe_id.to_string()))
    }

    /// All recipes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

/// Validate one recipe: unique step ids, command ownership, dependency
/// references. Worker membership is enforced by deserialization.
fn validate_recipe(recipe: &Recipe) -> Result<(), RecipeError> {
    if recipe.id.is_empty() {
        return Err(RecipeError::invalid("", "recipe id must not be empty"));
    }
    if recipe.steps.is_empty() {
        return Err(RecipeError::invalid(&recipe.id, "recipe has no steps"));
    }

    let mut seen = std::collections::HashSet::new();
    for step in &recipe.steps {
        if step.id.is_empty() {
            return Err(RecipeError::invalid(&recipe.id, "step id must not be empty"));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(RecipeError::invalid(
                &recipe.id,
                format!("duplicate step id: {}", step.id),
            ));
        }
    }

    for step in &recipe.steps {
        match ep_proto::command_owner(&step.command) {
            None => {
                return Err(RecipeError::invalid(
                    &recipe.id,
                    format!("step {} uses unknown command: {}", step.id, step.command),
                ))
            }
            Some(owner) if owner != step.worker => {
                return Err(RecipeError::invalid(
                    &recipe.id,
                    format!(
                        "step {}: command {} is owned by worker {}, not {}",
                        step.id, step.command, owner, step.worker
                    ),
                ))
            }
            Some(_) => {}
        }

        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(RecipeError::invalid(
                    &recipe.id,
                    format!("step {} depends on itself", step.id),
                ));
            }
            if !seen.contains(dep.as_str()) {
                return Err(RecipeError::invalid(
                    &recipe.id,
                    format!("step {} depends on undeclared step: {}", step.id, dep),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
