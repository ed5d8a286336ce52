use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealplan_core::models::NewRecipe;
use mealplan_core::service::MealPlanService;

use super::helpers::{or_exit_not_found, parse_ingredient, truncate};

pub(crate) fn cmd_recipe_add(
    svc: &MealPlanService,
    title: &str,
    description: Option<String>,
    ingredients: &[String],
    json: bool,
) -> Result<()> {
    let ingredients = ingredients
        .iter()
        .map(|s| parse_ingredient(s))
        .collect::<Result<Vec<_>>>()?;
    let recipe = svc.create_recipe(&NewRecipe {
        title: title.to_string(),
        description,
        ingredients,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let count = recipe.ingredients.len();
        println!("Created recipe: {} ({count} ingredients)", recipe.title);
        println!("  id: {}", recipe.id);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(svc: &MealPlanService, recipe_id: &str, json: bool) -> Result<()> {
    let recipe = or_exit_not_found(svc.get_recipe(recipe_id), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    println!("=== {} ===", recipe.title);
    if let Some(description) = &recipe.description {
        println!("  {description}");
    }
    println!("\n  INGREDIENTS:");
    for ing in &recipe.ingredients {
        let quantity = format!("{} {}", ing.amount, ing.unit);
        let quantity = quantity.trim();
        if quantity.is_empty() {
            println!("    {}", ing.name);
        } else {
            println!("    {}: {quantity}", ing.name);
        }
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(svc: &MealPlanService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
    }

    let recipes = svc.list_recipes()?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id.clone(),
            title: truncate(&r.title, 35),
            ingredients: r.ingredients.len(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}
