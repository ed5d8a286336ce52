use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealplan_core::models::{DATE_FORMAT, MealPlanDetail};
use mealplan_core::service::MealPlanService;

use super::helpers::{check_mark, or_exit_not_found, parse_date, truncate};

/// Default plan length when `--end` is omitted: one week including the start day.
const DEFAULT_PLAN_DAYS: i64 = 6;

pub(crate) fn cmd_plan_create(
    svc: &MealPlanService,
    owner: &str,
    name: &str,
    start: Option<&str>,
    end: Option<&str>,
    json: bool,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = match end {
        Some(s) => parse_date(Some(s))?,
        None => start + chrono::Duration::days(DEFAULT_PLAN_DAYS),
    };
    let plan = svc.create_plan(
        owner,
        name,
        &start.format(DATE_FORMAT).to_string(),
        &end.format(DATE_FORMAT).to_string(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        let id = &plan.id;
        println!("Created meal plan: {} ({start} to {end})", plan.name);
        println!("  id: {id}");
        println!("Add meals with: mealplan plan add-meal {id} <recipe-id> --meal dinner");
    }
    Ok(())
}

pub(crate) fn cmd_plan_list(svc: &MealPlanService, owner: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Start")]
        start: String,
        #[tabled(rename = "End")]
        end: String,
        #[tabled(rename = "Meals")]
        meals: usize,
        #[tabled(rename = "Groceries")]
        groceries: String,
    }

    let plans = svc.list_plans(owner)?;
    if plans.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No meal plans found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| {
            let checked = p.grocery_list.iter().filter(|g| g.checked).count();
            PlanRow {
                id: p.id.clone(),
                name: truncate(&p.name, 30),
                start: p.start_date.to_string(),
                end: p.end_date.to_string(),
                meals: p.meals.len(),
                groceries: format!("{checked}/{}", p.grocery_list.len()),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_plan_show(
    svc: &MealPlanService,
    owner: &str,
    plan_id: &str,
    json: bool,
) -> Result<()> {
    let plan = or_exit_not_found(svc.get_plan(owner, plan_id), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &MealPlanDetail) {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Meal")]
        meal_type: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
    }

    #[derive(Tabled)]
    struct GroceryRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = " ")]
        checked: &'static str,
        #[tabled(rename = "Ingredient")]
        ingredient: String,
        #[tabled(rename = "Amount")]
        amount: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let name = &plan.name;
    let start = plan.start_date;
    let end = plan.end_date;
    println!("=== {name} ===");
    println!("  {start} to {end}  |  id: {}\n", plan.id);

    if plan.meals.is_empty() {
        println!("  No meals planned yet.");
    } else {
        let rows: Vec<MealRow> = plan
            .meals
            .iter()
            .map(|m| MealRow {
                date: m.entry.date.to_string(),
                meal_type: m.entry.meal_type.clone(),
                recipe: if m.recipe.is_some() {
                    truncate(&m.entry.recipe_name, 35)
                } else {
                    format!("{} (deleted)", truncate(&m.entry.recipe_name, 25))
                },
            })
            .collect();
        let table = Table::new(&rows).with(Style::rounded()).to_string();
        println!("{table}");
    }

    if plan.grocery_list.is_empty() {
        return;
    }
    println!("\n  GROCERIES:");
    let rows: Vec<GroceryRow> = plan
        .grocery_list
        .iter()
        .map(|g| GroceryRow {
            idx: g.position,
            checked: check_mark(g.checked),
            ingredient: truncate(&g.ingredient, 35),
            amount: g.amount.clone(),
            unit: g.unit.clone(),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_plan_add_meal(
    svc: &MealPlanService,
    owner: &str,
    plan_id: &str,
    recipe_id: &str,
    meal_type: &str,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let meal = or_exit_not_found(
        svc.add_meal(
            owner,
            plan_id,
            &date.format(DATE_FORMAT).to_string(),
            meal_type,
            recipe_id,
        ),
        json,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meal)?);
    } else {
        let recipe_name = &meal.recipe_name;
        let meal_type = &meal.meal_type;
        println!("Added {recipe_name} for {meal_type} on {date}");
    }
    Ok(())
}

/// `item` is either a 0-based grocery index or a grocery item id.
pub(crate) fn cmd_plan_check(
    svc: &MealPlanService,
    owner: &str,
    plan_id: &str,
    item: &str,
    checked: bool,
    json: bool,
) -> Result<()> {
    let state = if checked { "Checked" } else { "Unchecked" };

    if let Ok(index) = item.parse::<usize>() {
        or_exit_not_found(
            svc.set_grocery_item_checked(owner, plan_id, index, checked),
            json,
        )?;
        if json {
            println!(
                "{}",
                serde_json::json!({ "success": true, "index": index, "checked": checked })
            );
        } else {
            println!("{state} grocery item #{index}");
        }
        return Ok(());
    }

    let updated = or_exit_not_found(
        svc.set_grocery_item_checked_by_id(owner, plan_id, item, checked),
        json,
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("{state} {}", updated.ingredient);
    }
    Ok(())
}

pub(crate) fn cmd_plan_reconcile(
    svc: &MealPlanService,
    owner: &str,
    plan_id: &str,
    json: bool,
) -> Result<()> {
    let appended = or_exit_not_found(svc.reconcile_grocery_list(owner, plan_id), json)?;
    if json {
        println!("{}", serde_json::json!({ "appended": appended }));
    } else if appended == 0 {
        println!("Grocery list already up to date");
    } else {
        println!("Appended {appended} missing grocery item(s)");
    }
    Ok(())
}

/// Write the grocery list as CSV (or JSON with `--json`) to `output`, or to
/// stdout when no path is given.
pub(crate) fn cmd_plan_export(
    svc: &MealPlanService,
    owner: &str,
    plan_id: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let contents = if json {
        let plan = or_exit_not_found(svc.get_plan(owner, plan_id), json)?;
        serde_json::to_string_pretty(&plan.grocery_list)?
    } else {
        or_exit_not_found(svc.grocery_list_csv(owner, plan_id), json)?
    };

    match output {
        Some(path) => {
            std::fs::write(path, &contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote grocery list to {}", path.display());
        }
        None => print!("{contents}"),
    }
    Ok(())
}
