use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

// --- Recipes (looked up, never owned by a plan) ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub ingredients: Vec<Ingredient>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

// --- Meal plans ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlan {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub meals: Vec<MealEntry>,
    pub grocery_list: Vec<GroceryItem>,
    pub created_at: String,
    pub updated_at: String,
}

/// A planned meal. `recipe_name` is a snapshot of the recipe title taken
/// when the meal was added and is never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealEntry {
    pub id: String,
    pub date: NaiveDate,
    pub meal_type: String,
    pub recipe_id: String,
    pub recipe_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroceryItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_id: Option<String>,
    pub position: usize,
    pub ingredient: String,
    pub amount: String,
    pub unit: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroceryItem {
    pub ingredient: String,
    pub amount: String,
    pub unit: String,
    pub checked: bool,
}

#[derive(Debug, Clone)]
pub struct NewMealPlan {
    pub owner_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct NewMealEntry {
    pub date: NaiveDate,
    pub meal_type: String,
    pub recipe_id: String,
    pub recipe_name: String,
}

// --- Read-side views ---

/// A meal entry with its recipe attached at read time. `recipe` is `None`
/// when the referenced recipe no longer exists.
#[derive(Debug, Clone, Serialize)]
pub struct HydratedMealEntry {
    #[serde(flatten)]
    pub entry: MealEntry,
    pub recipe: Option<Recipe>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanDetail {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub meals: Vec<HydratedMealEntry>,
    pub grocery_list: Vec<GroceryItem>,
    pub created_at: String,
    pub updated_at: String,
}

impl MealPlanDetail {
    /// Attach recipes to the plan's meals by id. Meals whose recipe is not in
    /// `recipes` hydrate with `recipe: None`.
    #[must_use]
    pub fn hydrate(plan: MealPlan, recipes: &[Recipe]) -> Self {
        let meals = plan
            .meals
            .into_iter()
            .map(|entry| {
                let recipe = recipes.iter().find(|r| r.id == entry.recipe_id).cloned();
                HydratedMealEntry { entry, recipe }
            })
            .collect();
        Self {
            id: plan.id,
            owner_id: plan.owner_id,
            name: plan.name,
            start_date: plan.start_date,
            end_date: plan.end_date,
            meals,
            grocery_list: plan.grocery_list,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

// --- Validation ---

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a required calendar date. Accepts `YYYY-MM-DD` or a full RFC 3339
/// timestamp, in which case the date part is kept.
pub fn parse_plan_date(field: &str, value: &str) -> Result<NaiveDate, PlanError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PlanError::validation(format!("{field} is required")));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Ok(date);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.date_naive())
        .map_err(|_| PlanError::validation(format!("Invalid {field} '{value}'. Use YYYY-MM-DD")))
}

pub fn validate_plan_name(name: &str) -> Result<String, PlanError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PlanError::validation("name is required"));
    }
    Ok(name.to_string())
}

/// Meal types are free-form labels; only emptiness is rejected.
pub fn validate_meal_type(meal_type: &str) -> Result<String, PlanError> {
    let meal_type = meal_type.trim();
    if meal_type.is_empty() {
        return Err(PlanError::validation("mealType is required"));
    }
    Ok(meal_type.to_string())
}

pub fn validate_recipe_id(recipe_id: &str) -> Result<String, PlanError> {
    let recipe_id = recipe_id.trim();
    if recipe_id.is_empty() {
        return Err(PlanError::validation("recipeId is required"));
    }
    Ok(recipe_id.to_string())
}

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<(), PlanError> {
    if recipe.title.trim().is_empty() {
        return Err(PlanError::validation("Recipe title must not be empty"));
    }
    if let Some(pos) = recipe
        .ingredients
        .iter()
        .position(|i| i.name.trim().is_empty())
    {
        return Err(PlanError::validation(format!(
            "Ingredient {} has an empty name",
            pos + 1
        )));
    }
    Ok(())
}
