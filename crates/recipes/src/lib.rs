// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-recipes: declarative multi-step recipes and plan compilation.
//!
//! A recipe declares inputs, defaults, a list of worker steps, and an
//! outputs template. `build_plan` interpolates `${...}` references against
//! defaults and user input, producing a submit-ready plan for the engine.

mod catalog;
mod plan;
mod template;
mod types;

pub use catalog::Catalog;
pub use plan::{build_plan, materialize_outputs, Plan, PlanOptions, PlanStep};
pub use template::{interpolate, resolve_path};
pub use types::{InputSpec, Recipe, RecipeStep};

use thiserror::Error;

/// Errors from catalog loading, validation, and plan compilation.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog must be an array of recipes")]
    NotAnArray,
    #[error("duplicate recipe id: {0}")]
    DuplicateRecipe(String),
    #[error("unknown recipe: {0}")]
    UnknownRecipe(String),
    #[error("invalid recipe {recipe}: {message}")]
    Invalid { recipe: String, message: String },
}

impl RecipeError {
    pub(crate) fn invalid(recipe: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            recipe: recipe.to_string(),
            message: message.into(),
        }
    }
}
