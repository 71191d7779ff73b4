use anyhow::{bail, Context, Result};
use colored::Colorize;
use dialoguer::Password;
use std::path::Path;

use crate::cli::{ConfigAction, GlobalArgs};
use crate::config::{config_path, save_config, try_load_config, Config, PricingConfig};

pub async fn run(global: &GlobalArgs, action: ConfigAction) -> Result<()> {
    let path = global.config.as_deref();
    match action {
        ConfigAction::Show => show(global),
        ConfigAction::Path => {
            println!("{}", config_path(path)?.display());
            Ok(())
        }
        ConfigAction::ResetPricing => reset_pricing(path),
        ConfigAction::SetKey { key } => set_key(path, key),
    }
}

fn show(global: &GlobalArgs) -> Result<()> {
    let mut config = global.load_config();
    if !config.remote.api_key.is_empty() {
        config.remote.api_key = mask_key(&config.remote.api_key);
    }

    println!(
        "{} {}",
        "# logs:".dimmed(),
        display_path(&config.logs.root()).dimmed()
    );
    let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    print!("{}", text);
    Ok(())
}

/// Load the file about to be rewritten; a file that fails to parse is left
/// alone so the user's other settings survive.
fn load_for_update(path: Option<&Path>) -> Result<Config> {
    try_load_config(path).context("Config file is unreadable, fix or remove it before changing it")
}

fn reset_pricing(path: Option<&Path>) -> Result<()> {
    let mut config = load_for_update(path)?;
    config.pricing = PricingConfig::default();
    save_config(&config, path)?;
    eprintln!("[usage] Pricing reset to defaults");
    Ok(())
}

fn set_key(path: Option<&Path>, key: Option<String>) -> Result<()> {
    let key = match key {
        Some(k) => k,
        None => Password::new()
            .with_prompt("LiteLLM API key")
            .allow_empty_password(true)
            .interact()
            .context("Failed to read API key")?,
    };
    let key = key.trim().to_string();

    if !key.is_empty() && !key.starts_with("sk-") {
        bail!("API key must start with \"sk-\"");
    }

    let mut config = load_for_update(path)?;
    config.remote.api_key = key;
    save_config(&config, path)?;

    if config.remote.api_key.is_empty() {
        eprintln!("[usage] API key cleared, using local logs only");
    } else {
        eprintln!("[usage] API key saved");
    }
    Ok(())
}

/// `sk-abcdef123456` as `sk-a…3456`.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir() {
        Some(home) => match path.strip_prefix(&home) {
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        None => path.display().to_string(),
    }
}
