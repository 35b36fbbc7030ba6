//! Configuration view and validation commands: `sandforge config`.

use anyhow::Result;
use std::path::Path;

use sandforge::config::{CONFIG_DIR, CONFIG_FILE, SandforgeConfig, SandforgeToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sandforge Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                SandforgeToml::load(&config_path)?
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
                SandforgeToml::default()
            };
            println!();
            print_sections(&toml);

            println!("Effective values (with env/CLI overrides):");
            let config = SandforgeConfig::new(project_dir.to_path_buf())?;
            println!("  generator = \"{}\"", config.generator_cmd());
            match config.model() {
                Some(model) => println!("  model = \"{}\"", model),
                None => println!("  model = (generator default)"),
            }
            println!("  sandbox_root = \"{}\"", config.sandbox_root().display());
            println!();

            if !config_path.exists() {
                println!("Run 'sandforge config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = SandforgeToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            SandforgeToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [classifier] confidence thresholds and suggestion limits");
            println!("  - [sandbox] lifetime, install command, read extensions");
            println!("  - [generation] command, args, model");
            println!();
        }
    }

    Ok(())
}

fn print_sections(toml: &SandforgeToml) {
    println!("[classifier]");
    println!("  match_increment = {}", toml.classifier.match_increment);
    println!("  min_confidence = {}", toml.classifier.min_confidence);
    println!("  project_type_bonus = {}", toml.classifier.project_type_bonus);
    println!("  fallback_confidence = {}", toml.classifier.fallback_confidence);
    println!("  max_suggestions = {}", toml.classifier.max_suggestions);
    println!();

    println!("[sandbox]");
    println!("  lifetime_secs = {}", toml.sandbox.lifetime_secs);
    println!("  install_timeout_secs = {}", toml.sandbox.install_timeout_secs);
    println!("  install_command = \"{}\"", toml.sandbox.install_command);
    println!("  read_extensions = {:?}", toml.sandbox.read_extensions);
    println!("  retry_partial_install = {}", toml.sandbox.retry_partial_install);
    if let Some(root) = &toml.sandbox.root_dir {
        println!("  root_dir = \"{}\"", root.display());
    }
    println!();

    if toml.generation.command.is_some() || !toml.generation.args.is_empty() {
        println!("[generation]");
        if let Some(command) = &toml.generation.command {
            println!("  command = \"{}\"", command);
        }
        if !toml.generation.args.is_empty() {
            println!("  args = {:?}", toml.generation.args);
        }
        println!();
    }

    println!("[retry]");
    println!("  max_attempts = {}", toml.retry.max_attempts);
    println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
    println!();

    println!("[history]");
    println!("  max_turns = {}", toml.history.max_turns);
    println!();
}
