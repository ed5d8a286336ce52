use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{GroceryItem, Ingredient, NewGroceryItem};

/// Project recipe ingredients into unchecked grocery items, one per
/// ingredient, in recipe order. Identical ingredients are not merged and
/// quantities are copied verbatim.
#[must_use]
pub fn build_grocery_items(ingredients: &[Ingredient]) -> Vec<NewGroceryItem> {
    ingredients
        .iter()
        .map(|ing| NewGroceryItem {
            ingredient: ing.name.clone(),
            amount: ing.amount.clone(),
            unit: ing.unit.clone(),
            checked: false,
        })
        .collect()
}

#[derive(Serialize)]
struct GroceryCsvRow<'a> {
    position: usize,
    ingredient: &'a str,
    amount: &'a str,
    unit: &'a str,
    checked: bool,
}

/// Render a grocery list as CSV with a header row.
pub fn grocery_list_to_csv(items: &[GroceryItem]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for item in items {
        wtr.serialize(GroceryCsvRow {
            position: item.position,
            ingredient: &item.ingredient,
            amount: &item.amount,
            unit: &item.unit,
            checked: item.checked,
        })
        .context("Failed to write grocery row")?;
    }
    if items.is_empty() {
        wtr.write_record(["position", "ingredient", "amount", "unit", "checked"])?;
    }
    let bytes = wtr.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("Grocery CSV is not valid UTF-8")
}
