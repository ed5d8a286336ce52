use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use mealplan_core::service::ServiceOptions;

pub const DEFAULT_USER: &str = "local";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    /// Owner id the CLI acts as.
    pub user: String,
    pub touch_on_check: bool,
    jwt_secret: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "mealplan").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Self::resolve(data_dir, |name| std::env::var(name).ok()))
    }

    /// Build a config for `data_dir`, reading overrides through `var`.
    fn resolve(data_dir: PathBuf, var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let db_path = non_empty("MEALPLAN_DB")
            .map_or_else(|| data_dir.join("mealplan.db"), PathBuf::from);
        let user = non_empty("MEALPLAN_USER")
            .map_or_else(|| DEFAULT_USER.to_string(), |u| u.trim().to_string());
        let touch_on_check = non_empty("MEALPLAN_TOUCH_ON_CHECK").is_some_and(|v| parse_flag(&v));
        let jwt_secret = non_empty("MEALPLAN_JWT_SECRET");

        Config {
            db_path,
            data_dir,
            user,
            touch_on_check,
            jwt_secret,
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            touch_on_grocery_check: self.touch_on_check,
        }
    }

    /// Return the token signing secret: `MEALPLAN_JWT_SECRET` when set,
    /// otherwise the `jwt_secret` file in the data directory, generating it
    /// on first use.
    ///
    /// Returns `(secret, newly_created)`.
    pub fn load_or_create_jwt_secret(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        if let Some(secret) = &self.jwt_secret {
            return Ok((secret.clone(), false));
        }

        let path = self.data_dir.join("jwt_secret");

        if path.exists() {
            let secret = std::fs::read_to_string(&path).context("Failed to read JWT secret file")?;
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                return Ok((secret, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let secret = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &secret).context("Failed to write JWT secret file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set JWT secret file permissions")?;
        }
        Ok((secret, true))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
