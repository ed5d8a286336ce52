use std::collections::HashSet;

use crate::db::Database;
use crate::error::PlanError;
use crate::grocery::{build_grocery_items, grocery_list_to_csv};
use crate::models::{
    GroceryItem, MealEntry, MealPlan, MealPlanDetail, NewMealEntry, NewMealPlan, NewRecipe,
    Recipe, parse_plan_date, validate_meal_type, validate_new_recipe, validate_plan_name,
    validate_recipe_id,
};

type Result<T> = std::result::Result<T, PlanError>;

const PLAN_NOT_FOUND: &str = "Meal plan not found";
const RECIPE_NOT_FOUND: &str = "Recipe not found";

/// Source of recipe data for meal insertion and plan hydration.
///
/// The local store implements this over its own recipe tables; a deployment
/// that keeps recipes elsewhere passes its own implementation to the `*_with`
/// methods on [`MealPlanService`].
pub trait RecipeLookup: Send {
    fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Recipe>>;

    /// Resolve many ids in one round trip. Unknown ids are omitted from the
    /// result; order is not significant.
    fn get_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Recipe>>;
}

impl RecipeLookup for Database {
    fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Recipe>> {
        self.get_recipe(id)
    }

    fn get_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Recipe>> {
        self.get_recipes_by_ids(ids)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    /// Refresh a plan's `updated_at` when a grocery item is checked or unchecked.
    pub touch_on_grocery_check: bool,
}

pub struct MealPlanService {
    db: Database,
    options: ServiceOptions,
}

impl MealPlanService {
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            options: ServiceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Meal plans ---

    pub fn create_plan(
        &self,
        owner_id: &str,
        name: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<MealPlan> {
        let owner_id = require_owner(owner_id)?;
        let name = validate_plan_name(name)?;
        let start_date = parse_plan_date("startDate", start_date)?;
        let end_date = parse_plan_date("endDate", end_date)?;
        if end_date < start_date {
            tracing::warn!(%start_date, %end_date, "meal plan ends before it starts");
        }

        let plan = self.db.insert_meal_plan(&NewMealPlan {
            owner_id: owner_id.to_string(),
            name,
            start_date,
            end_date,
        })?;
        tracing::info!(plan_id = %plan.id, owner = %owner_id, "created meal plan");
        Ok(plan)
    }

    pub fn list_plans(&self, owner_id: &str) -> Result<Vec<MealPlan>> {
        let owner_id = require_owner(owner_id)?;
        Ok(self.db.list_meal_plans(owner_id)?)
    }

    pub fn get_plan(&self, owner_id: &str, plan_id: &str) -> Result<MealPlanDetail> {
        self.get_plan_with(&self.db, owner_id, plan_id)
    }

    /// Load an owned plan and attach each meal's recipe, resolved with a
    /// single batched lookup.
    pub fn get_plan_with(
        &self,
        recipes: &dyn RecipeLookup,
        owner_id: &str,
        plan_id: &str,
    ) -> Result<MealPlanDetail> {
        let plan = self.owned_plan(owner_id, plan_id)?;

        let ids: Vec<String> = {
            let mut seen = HashSet::new();
            plan.meals
                .iter()
                .filter(|m| seen.insert(m.recipe_id.as_str()))
                .map(|m| m.recipe_id.clone())
                .collect()
        };
        let found = if ids.is_empty() {
            Vec::new()
        } else {
            recipes.get_by_ids(&ids)?
        };
        if found.len() < ids.len() {
            tracing::debug!(
                plan_id = %plan.id,
                missing = ids.len() - found.len(),
                "some planned recipes no longer exist"
            );
        }

        Ok(MealPlanDetail::hydrate(plan, &found))
    }

    pub fn add_meal(
        &self,
        owner_id: &str,
        plan_id: &str,
        date: &str,
        meal_type: &str,
        recipe_id: &str,
    ) -> Result<MealEntry> {
        self.add_meal_with(&self.db, owner_id, plan_id, date, meal_type, recipe_id)
    }

    /// Append a meal to an owned plan and extend its grocery list with the
    /// recipe's ingredients. The recipe is fetched before anything is written.
    pub fn add_meal_with(
        &self,
        recipes: &dyn RecipeLookup,
        owner_id: &str,
        plan_id: &str,
        date: &str,
        meal_type: &str,
        recipe_id: &str,
    ) -> Result<MealEntry> {
        let owner_id = require_owner(owner_id)?;
        let date = parse_plan_date("date", date)?;
        let meal_type = validate_meal_type(meal_type)?;
        let recipe_id = validate_recipe_id(recipe_id)?;

        if !self.db.owns_meal_plan(owner_id, plan_id)? {
            return Err(PlanError::not_found(PLAN_NOT_FOUND));
        }
        let recipe = recipes
            .get_by_id(&recipe_id)?
            .ok_or_else(|| PlanError::not_found(RECIPE_NOT_FOUND))?;

        let items = build_grocery_items(&recipe.ingredients);
        let meal = self.db.append_meal(
            plan_id,
            &NewMealEntry {
                date,
                meal_type,
                recipe_id,
                recipe_name: recipe.title,
            },
            &items,
        )?;
        tracing::info!(
            plan_id,
            meal_id = %meal.id,
            grocery_items = items.len(),
            "added meal to plan"
        );
        Ok(meal)
    }

    // --- Grocery list ---

    /// Check or uncheck the grocery item at `index` (0-based).
    pub fn set_grocery_item_checked(
        &self,
        owner_id: &str,
        plan_id: &str,
        index: usize,
        checked: bool,
    ) -> Result<()> {
        self.require_owned_plan(owner_id, plan_id)?;

        let count = self.db.grocery_item_count(plan_id)?;
        if index >= count {
            return Err(out_of_range(index, count));
        }
        let updated = self.db.set_grocery_checked_at(
            plan_id,
            index,
            checked,
            self.options.touch_on_grocery_check,
        )?;
        if !updated {
            return Err(out_of_range(index, count));
        }
        tracing::debug!(plan_id, index, checked, "toggled grocery item");
        Ok(())
    }

    pub fn set_grocery_item_checked_by_id(
        &self,
        owner_id: &str,
        plan_id: &str,
        item_id: &str,
        checked: bool,
    ) -> Result<GroceryItem> {
        self.require_owned_plan(owner_id, plan_id)?;
        let item = self
            .db
            .set_grocery_checked_by_id(
                plan_id,
                item_id,
                checked,
                self.options.touch_on_grocery_check,
            )?
            .ok_or_else(|| PlanError::not_found("Grocery item not found"))?;
        tracing::debug!(plan_id, item_id, checked, "toggled grocery item");
        Ok(item)
    }

    pub fn reconcile_grocery_list(&self, owner_id: &str, plan_id: &str) -> Result<usize> {
        self.reconcile_grocery_list_with(&self.db, owner_id, plan_id)
    }

    /// Derive grocery items for every meal that has none, e.g. after an
    /// interrupted insert. Meals whose recipe is gone are skipped. Returns the
    /// number of items appended; running it again appends nothing.
    pub fn reconcile_grocery_list_with(
        &self,
        recipes: &dyn RecipeLookup,
        owner_id: &str,
        plan_id: &str,
    ) -> Result<usize> {
        self.require_owned_plan(owner_id, plan_id)?;

        let meals = self.db.meals_without_grocery_items(plan_id)?;
        if meals.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = meals.iter().map(|m| m.recipe_id.clone()).collect();
        let found = recipes.get_by_ids(&ids)?;

        let mut appended = 0;
        for meal in &meals {
            let Some(recipe) = found.iter().find(|r| r.id == meal.recipe_id) else {
                tracing::debug!(meal_id = %meal.id, recipe_id = %meal.recipe_id, "recipe gone, skipping");
                continue;
            };
            let items = build_grocery_items(&recipe.ingredients);
            appended += self.db.append_grocery_items(plan_id, &meal.id, &items)?;
        }
        if appended > 0 {
            tracing::info!(plan_id, appended, "reconciled grocery list");
        }
        Ok(appended)
    }

    pub fn grocery_list_csv(&self, owner_id: &str, plan_id: &str) -> Result<String> {
        let plan = self.owned_plan(owner_id, plan_id)?;
        Ok(grocery_list_to_csv(&plan.grocery_list)?)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        validate_new_recipe(recipe)?;
        let recipe = self.db.insert_recipe(recipe)?;
        tracing::info!(recipe_id = %recipe.id, "created recipe");
        Ok(recipe)
    }

    pub fn get_recipe(&self, id: &str) -> Result<Recipe> {
        self.db
            .get_recipe(id)?
            .ok_or_else(|| PlanError::not_found(RECIPE_NOT_FOUND))
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        Ok(self.db.list_recipes()?)
    }

    // --- Helpers ---

    fn owned_plan(&self, owner_id: &str, plan_id: &str) -> Result<MealPlan> {
        let owner_id = require_owner(owner_id)?;
        self.db
            .get_meal_plan(owner_id, plan_id)?
            .ok_or_else(|| PlanError::not_found(PLAN_NOT_FOUND))
    }

    fn require_owned_plan(&self, owner_id: &str, plan_id: &str) -> Result<()> {
        let owner_id = require_owner(owner_id)?;
        if self.db.owns_meal_plan(owner_id, plan_id)? {
            Ok(())
        } else {
            Err(PlanError::not_found(PLAN_NOT_FOUND))
        }
    }
}

fn require_owner(owner_id: &str) -> Result<&str> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(PlanError::Unauthorized("missing caller identity".to_string()));
    }
    Ok(owner_id)
}

fn out_of_range(index: usize, count: usize) -> PlanError {
    PlanError::validation(format!(
        "Grocery item index {index} is out of range (list has {count} items)"
    ))
}
