//! `cortex onboard`: First-time setup.

use cortex_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Cortex - First-Time Setup");
    println!("=========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    let defaults = AppConfig::default();
    if !defaults.history.dir.exists() {
        std::fs::create_dir_all(&defaults.history.dir)?;
        println!("  Created chat history directory: {}", defaults.history.dir.display());
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created config.toml at: {}", config_path.display());
    println!("\nNext steps:");
    println!("   1. Start llama.cpp's server (default {})", defaults.model.provider_url);
    println!("   2. Set model.name in {}", config_path.display());
    println!("   3. Run: cortex doctor");
    println!("   4. Run: cortex chat\n");

    Ok(())
}
