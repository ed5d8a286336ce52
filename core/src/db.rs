use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Type};
use uuid::Uuid;

use crate::models::{
    DATE_FORMAT, GroceryItem, Ingredient, MealEntry, MealPlan, NewGroceryItem, NewMealEntry,
    NewMealPlan, NewRecipe, Recipe,
};

/// Upper bound on bound parameters per `IN (...)` query.
const IN_CHUNK: usize = 500;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", true)?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    amount TEXT NOT NULL,
                    unit TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plans (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                -- recipe_id is a weak reference: no foreign key, no cascade
                CREATE TABLE IF NOT EXISTS plan_meals (
                    id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
                    seq INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    recipe_id TEXT NOT NULL,
                    recipe_name TEXT NOT NULL,
                    UNIQUE (plan_id, seq)
                );

                CREATE TABLE IF NOT EXISTS grocery_items (
                    id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
                    meal_id TEXT REFERENCES plan_meals(id),
                    position INTEGER NOT NULL,
                    ingredient TEXT NOT NULL,
                    amount TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    checked INTEGER NOT NULL DEFAULT 0,
                    UNIQUE (plan_id, position)
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_meal_plans_owner ON meal_plans(owner_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_grocery_items_meal ON grocery_items(meal_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
        let raw: String = row.get(idx)?;
        NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn position_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<usize> {
        let raw: i64 = row.get(idx)?;
        usize::try_from(raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
    }

    // Expects columns: id, title, description, created_at
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            ingredients: Vec::new(),
            created_at: row.get(3)?,
        })
    }

    // Expects columns: id, owner_id, name, start_date, end_date, created_at, updated_at
    fn meal_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
        Ok(MealPlan {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            start_date: Self::date_column(row, 3)?,
            end_date: Self::date_column(row, 4)?,
            meals: Vec::new(),
            grocery_list: Vec::new(),
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    // Expects columns: id, date, meal_type, recipe_id, recipe_name
    fn meal_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealEntry> {
        Ok(MealEntry {
            id: row.get(0)?,
            date: Self::date_column(row, 1)?,
            meal_type: row.get(2)?,
            recipe_id: row.get(3)?,
            recipe_name: row.get(4)?,
        })
    }

    // Expects columns: id, meal_id, position, ingredient, amount, unit, checked
    fn grocery_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<GroceryItem> {
        Ok(GroceryItem {
            id: row.get(0)?,
            meal_id: row.get(1)?,
            position: Self::position_column(row, 2)?,
            ingredient: row.get(3)?,
            amount: row.get(4)?,
            unit: row.get(5)?,
            checked: row.get(6)?,
        })
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let title = recipe.title.trim().to_string();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO recipes (id, title, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, recipe.description, now],
        )?;
        for (position, ing) in (0_i64..).zip(&recipe.ingredients) {
            tx.execute(
                "INSERT INTO recipe_ingredients (recipe_id, position, name, amount, unit)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, position, ing.name.trim(), ing.amount, ing.unit],
            )?;
        }
        tx.commit()?;

        Ok(Recipe {
            id,
            title,
            description: recipe.description.clone(),
            ingredients: recipe
                .ingredients
                .iter()
                .map(|ing| Ingredient {
                    name: ing.name.trim().to_string(),
                    amount: ing.amount.clone(),
                    unit: ing.unit.clone(),
                })
                .collect(),
            created_at: now,
        })
    }

    pub fn get_recipe(&self, id: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT id, title, description, created_at FROM recipes WHERE id = ?1",
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        match recipe {
            Some(mut recipe) => {
                let mut ingredients = self.load_ingredients(&[recipe.id.as_str()])?;
                recipe.ingredients = ingredients.remove(&recipe.id).unwrap_or_default();
                Ok(Some(recipe))
            }
            None => Ok(None),
        }
    }

    /// Fetch every recipe whose id is in `ids`. Unknown ids are skipped and
    /// duplicates collapse to one recipe; result order is unspecified.
    pub fn get_recipes_by_ids(&self, ids: &[String]) -> Result<Vec<Recipe>> {
        let mut unique: Vec<&str> = ids.iter().map(String::as_str).collect();
        unique.sort_unstable();
        unique.dedup();

        let mut recipes = Vec::new();
        for chunk in unique.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, title, description, created_at FROM recipes WHERE id IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), Self::recipe_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            recipes.extend(rows);
        }

        self.attach_ingredients(&mut recipes)?;
        Ok(recipes)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, created_at FROM recipes
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let mut recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_ingredients(&mut recipes)?;
        Ok(recipes)
    }

    fn attach_ingredients(&self, recipes: &mut [Recipe]) -> Result<()> {
        let ids: Vec<&str> = recipes.iter().map(|r| r.id.as_str()).collect();
        let mut by_recipe = self.load_ingredients(&ids)?;
        for recipe in recipes.iter_mut() {
            recipe.ingredients = by_recipe.remove(&recipe.id).unwrap_or_default();
        }
        Ok(())
    }

    fn load_ingredients(&self, recipe_ids: &[&str]) -> Result<HashMap<String, Vec<Ingredient>>> {
        let mut by_recipe: HashMap<String, Vec<Ingredient>> = HashMap::new();
        for chunk in recipe_ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT recipe_id, name, amount, unit FROM recipe_ingredients
                 WHERE recipe_id IN ({placeholders})
                 ORDER BY recipe_id, position"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Ingredient {
                        name: row.get(1)?,
                        amount: row.get(2)?,
                        unit: row.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (recipe_id, ingredient) = row?;
                by_recipe.entry(recipe_id).or_default().push(ingredient);
            }
        }
        Ok(by_recipe)
    }

    // --- Meal plans ---

    pub fn insert_meal_plan(&self, plan: &NewMealPlan) -> Result<MealPlan> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO meal_plans (id, owner_id, name, start_date, end_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                plan.owner_id,
                plan.name,
                plan.start_date.format(DATE_FORMAT).to_string(),
                plan.end_date.format(DATE_FORMAT).to_string(),
                now,
                now,
            ],
        )?;
        Ok(MealPlan {
            id,
            owner_id: plan.owner_id.clone(),
            name: plan.name.clone(),
            start_date: plan.start_date,
            end_date: plan.end_date,
            meals: Vec::new(),
            grocery_list: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Load a plan with its meals and grocery list. Returns `None` both when
    /// the plan does not exist and when it belongs to another owner.
    pub fn get_meal_plan(&self, owner_id: &str, plan_id: &str) -> Result<Option<MealPlan>> {
        let plan = self
            .conn
            .query_row(
                "SELECT id, owner_id, name, start_date, end_date, created_at, updated_at
                 FROM meal_plans WHERE id = ?1 AND owner_id = ?2",
                params![plan_id, owner_id],
                Self::meal_plan_from_row,
            )
            .optional()?;
        match plan {
            Some(mut plan) => {
                self.load_plan_children(&mut plan)?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    pub fn list_meal_plans(&self, owner_id: &str) -> Result<Vec<MealPlan>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, name, start_date, end_date, created_at, updated_at
             FROM meal_plans WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let mut plans = stmt
            .query_map(params![owner_id], Self::meal_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for plan in &mut plans {
            self.load_plan_children(plan)?;
        }
        Ok(plans)
    }

    pub fn owns_meal_plan(&self, owner_id: &str, plan_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM meal_plans WHERE id = ?1 AND owner_id = ?2",
                params![plan_id, owner_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load_plan_children(&self, plan: &mut MealPlan) -> Result<()> {
        plan.meals = self.get_plan_meals(&plan.id)?;
        plan.grocery_list = self.get_grocery_items(&plan.id)?;
        Ok(())
    }

    pub fn get_plan_meals(&self, plan_id: &str) -> Result<Vec<MealEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, meal_type, recipe_id, recipe_name
             FROM plan_meals WHERE plan_id = ?1 ORDER BY seq",
        )?;
        let meals = stmt
            .query_map(params![plan_id], Self::meal_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Meals that have no grocery item pointing back at them.
    pub fn meals_without_grocery_items(&self, plan_id: &str) -> Result<Vec<MealEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.date, m.meal_type, m.recipe_id, m.recipe_name
             FROM plan_meals m
             WHERE m.plan_id = ?1
               AND NOT EXISTS (SELECT 1 FROM grocery_items g WHERE g.meal_id = m.id)
             ORDER BY m.seq",
        )?;
        let meals = stmt
            .query_map(params![plan_id], Self::meal_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Append a meal, refresh the plan's `updated_at`, and append the meal's
    /// grocery items, all in one transaction.
    pub fn append_meal(
        &self,
        plan_id: &str,
        meal: &NewMealEntry,
        items: &[NewGroceryItem],
    ) -> Result<MealEntry> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let date_str = meal.date.format(DATE_FORMAT).to_string();

        let tx = self.conn.unchecked_transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM plan_meals WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO plan_meals (id, plan_id, seq, date, meal_type, recipe_id, recipe_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                plan_id,
                seq,
                date_str,
                meal.meal_type,
                meal.recipe_id,
                meal.recipe_name,
            ],
        )?;
        let touched = tx.execute(
            "UPDATE meal_plans SET updated_at = ?1 WHERE id = ?2",
            params![now, plan_id],
        )?;
        if touched == 0 {
            bail!("Meal plan {plan_id} vanished while adding a meal");
        }
        Self::insert_grocery_items(&tx, plan_id, Some(&id), items)?;
        tx.commit()?;

        Ok(MealEntry {
            id,
            date: meal.date,
            meal_type: meal.meal_type.clone(),
            recipe_id: meal.recipe_id.clone(),
            recipe_name: meal.recipe_name.clone(),
        })
    }

    /// Append grocery items derived from an existing meal. Returns the number
    /// of items written.
    pub fn append_grocery_items(
        &self,
        plan_id: &str,
        meal_id: &str,
        items: &[NewGroceryItem],
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let written = Self::insert_grocery_items(&tx, plan_id, Some(meal_id), items)?;
        tx.commit()?;
        Ok(written)
    }

    fn insert_grocery_items(
        conn: &Connection,
        plan_id: &str,
        meal_id: Option<&str>,
        items: &[NewGroceryItem],
    ) -> Result<usize> {
        let mut position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM grocery_items WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO grocery_items (id, plan_id, meal_id, position, ingredient, amount, unit, checked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for item in items {
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                plan_id,
                meal_id,
                position,
                item.ingredient,
                item.amount,
                item.unit,
                item.checked,
            ])?;
            position += 1;
        }
        Ok(items.len())
    }

    // --- Grocery items ---

    pub fn get_grocery_items(&self, plan_id: &str) -> Result<Vec<GroceryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meal_id, position, ingredient, amount, unit, checked
             FROM grocery_items WHERE plan_id = ?1 ORDER BY position",
        )?;
        let items = stmt
            .query_map(params![plan_id], Self::grocery_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn grocery_item_count(&self, plan_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM grocery_items WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        usize::try_from(count).context("grocery item count out of range")
    }

    /// Set `checked` on the item at `position`. Returns false when no item
    /// sits at that position.
    pub fn set_grocery_checked_at(
        &self,
        plan_id: &str,
        position: usize,
        checked: bool,
        touch_plan: bool,
    ) -> Result<bool> {
        let position = i64::try_from(position).context("grocery index out of range")?;
        let rows = self.conn.execute(
            "UPDATE grocery_items SET checked = ?1 WHERE plan_id = ?2 AND position = ?3",
            params![checked, plan_id, position],
        )?;
        if rows > 0 && touch_plan {
            self.touch_meal_plan(plan_id)?;
        }
        Ok(rows > 0)
    }

    pub fn set_grocery_checked_by_id(
        &self,
        plan_id: &str,
        item_id: &str,
        checked: bool,
        touch_plan: bool,
    ) -> Result<Option<GroceryItem>> {
        let rows = self.conn.execute(
            "UPDATE grocery_items SET checked = ?1 WHERE plan_id = ?2 AND id = ?3",
            params![checked, plan_id, item_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        if touch_plan {
            self.touch_meal_plan(plan_id)?;
        }
        self.get_grocery_item(plan_id, item_id)
    }

    pub fn get_grocery_item(&self, plan_id: &str, item_id: &str) -> Result<Option<GroceryItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT id, meal_id, position, ingredient, amount, unit, checked
                 FROM grocery_items WHERE plan_id = ?1 AND id = ?2",
                params![plan_id, item_id],
                Self::grocery_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn touch_meal_plan(&self, plan_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE meal_plans SET updated_at = ?1 WHERE id = ?2",
            params![now, plan_id],
        )?;
        Ok(())
    }
}
