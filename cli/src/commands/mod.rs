mod helpers;
mod plan;
mod recipe;

pub(crate) use helpers::json_error;
pub(crate) use plan::{
    cmd_plan_add_meal, cmd_plan_check, cmd_plan_create, cmd_plan_export, cmd_plan_list,
    cmd_plan_reconcile, cmd_plan_show,
};
pub(crate) use recipe::{cmd_recipe_add, cmd_recipe_list, cmd_recipe_show};
