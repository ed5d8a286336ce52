mod auth;
mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::{IdentityProvider, JwtIdentity, StaticIdentity};
use crate::commands::{
    cmd_plan_add_meal, cmd_plan_check, cmd_plan_create, cmd_plan_export, cmd_plan_list,
    cmd_plan_reconcile, cmd_plan_show, cmd_recipe_add, cmd_recipe_list, cmd_recipe_show,
    json_error,
};
use crate::config::Config;
use mealplan_core::db::Database;
use mealplan_core::service::MealPlanService;

#[derive(Parser)]
#[command(
    name = "mealplan",
    version,
    about = "Plan meals from recipes and keep a checkable grocery list"
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Act as this user (default: $MEALPLAN_USER or "local")
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and manage meal plans and their grocery lists
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Manage recipes that meals are planned from
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable token authentication; every request acts as the local user
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create an empty meal plan
    Create {
        /// Plan name
        name: String,
        /// First day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Last day (YYYY-MM-DD or today/yesterday/tomorrow, default: start + 6 days)
        #[arg(long)]
        end: Option<String>,
    },
    /// List your meal plans, newest first
    List,
    /// Show a plan with its meals and grocery list
    Show {
        /// Meal plan ID
        plan_id: String,
    },
    /// Add a recipe to a plan and extend the grocery list
    AddMeal {
        /// Meal plan ID
        plan_id: String,
        /// Recipe ID
        recipe_id: String,
        /// Meal label, e.g. breakfast, lunch, dinner
        #[arg(short, long, default_value = "dinner")]
        meal: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Check off a grocery item by index (0-based) or item ID
    Check {
        /// Meal plan ID
        plan_id: String,
        /// Grocery item index or ID
        item: String,
        /// Uncheck instead of check
        #[arg(long)]
        uncheck: bool,
    },
    /// Re-derive grocery items for meals that have none
    Reconcile {
        /// Meal plan ID
        plan_id: String,
    },
    /// Export the grocery list as CSV
    Export {
        /// Meal plan ID
        plan_id: String,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Add a recipe
    Add {
        /// Recipe title
        title: String,
        /// Short description
        #[arg(short, long)]
        description: Option<String>,
        /// Ingredient as "name,amount,unit" (repeatable)
        #[arg(short, long = "ingredient", value_name = "NAME,AMOUNT,UNIT")]
        ingredients: Vec<String>,
    },
    /// Show a recipe and its ingredients
    Show {
        /// Recipe ID
        recipe_id: String,
    },
    /// List all recipes
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { .. }));

    let json = cli.json;
    if let Err(e) = run(cli).await {
        if json {
            println!("{}", json_error(&format!("{e:#}")));
        } else {
            eprintln!("Error: {e:#}");
        }
        process::exit(1);
    }
}

/// Log to stderr, filtered by `RUST_LOG`. The server logs its own activity
/// by default; other commands only surface warnings.
fn init_tracing(serving: bool) {
    let default = if serving {
        "mealplan=info,mealplan_core=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let svc = MealPlanService::from_database(db).with_options(config.service_options());
    let owner = cli.user.unwrap_or_else(|| config.user.clone());
    let json = cli.json;

    match cli.command {
        Commands::Plan { command } => match command {
            PlanCommands::Create { name, start, end } => cmd_plan_create(
                &svc,
                &owner,
                &name,
                start.as_deref(),
                end.as_deref(),
                json,
            ),
            PlanCommands::List => cmd_plan_list(&svc, &owner, json),
            PlanCommands::Show { plan_id } => cmd_plan_show(&svc, &owner, &plan_id, json),
            PlanCommands::AddMeal {
                plan_id,
                recipe_id,
                meal,
                date,
            } => cmd_plan_add_meal(
                &svc,
                &owner,
                &plan_id,
                &recipe_id,
                &meal,
                date.as_deref(),
                json,
            ),
            PlanCommands::Check {
                plan_id,
                item,
                uncheck,
            } => cmd_plan_check(&svc, &owner, &plan_id, &item, !uncheck, json),
            PlanCommands::Reconcile { plan_id } => {
                cmd_plan_reconcile(&svc, &owner, &plan_id, json)
            }
            PlanCommands::Export { plan_id, output } => {
                cmd_plan_export(&svc, &owner, &plan_id, output.as_deref(), json)
            }
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Add {
                title,
                description,
                ingredients,
            } => cmd_recipe_add(&svc, &title, description, &ingredients, json),
            RecipeCommands::Show { recipe_id } => cmd_recipe_show(&svc, &recipe_id, json),
            RecipeCommands::List => cmd_recipe_list(&svc, json),
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let identity: Arc<dyn IdentityProvider> = if no_auth {
                Arc::new(StaticIdentity::new(owner))
            } else {
                let (secret, created) = config.load_or_create_jwt_secret()?;
                if created {
                    eprintln!(
                        "Generated new token signing secret in {}",
                        config.data_dir.join("jwt_secret").display()
                    );
                }
                Arc::new(JwtIdentity::new(&secret))
            };
            let state = server::AppState::new(svc, identity);
            server::start_server(state, port, &bind, !no_auth).await
        }
    }
}
