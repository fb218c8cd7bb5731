//! `cortex doctor`: Diagnose config, model runtime and tools.

use cortex_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Cortex Doctor - System Diagnostics");
    println!("==================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file, using defaults (run `cortex onboard`)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    let state = cortex_gateway::build_state(&config);
    let assistant = &state.assistant;

    if assistant.runtime_healthy().await {
        println!("  ✅ Model runtime reachable at {}", config.model.provider_url);
        match assistant.list_models().await {
            Ok(models) if models.is_empty() => {
                println!("  ⚠️  Runtime reports no models");
                issues += 1;
            }
            Ok(models) => {
                println!("  ✅ Runtime models: {}", models.join(", "));
                if !models.iter().any(|m| m == &config.model.name) {
                    println!("  ⚠️  Configured model '{}' is not in the list", config.model.name);
                    issues += 1;
                }
            }
            Err(e) => {
                println!("  ⚠️  Could not list models: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ❌ Model runtime not reachable at {}", config.model.provider_url);
        issues += 1;
    }

    let tools = assistant.tools();
    println!(
        "  ✅ Tools: {}",
        tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if config.tools.image_api_url.is_none() {
        println!("  ℹ️  generate_image disabled (set tools.image_api_url to enable)");
    }

    match state.chats.list().await {
        Ok(chats) => println!(
            "  ✅ Chat history: {} saved in {}",
            chats.len(),
            config.history.dir.display()
        ),
        Err(e) => {
            println!("  ❌ Chat history unreadable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
