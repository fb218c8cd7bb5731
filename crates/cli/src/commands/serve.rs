//! `cortex serve`: Start the HTTP API server.

use cortex_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Cortex Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Runtime:   {}", config.model.provider_url);
    println!(
        "   Model:     {}{}",
        config.model.name,
        if config.model.autoload { " (autoload)" } else { "" }
    );

    cortex_gateway::start(config).await?;

    Ok(())
}
