//! `parley gateway`: Start the room server.

use parley_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("💬 Parley Gateway");
    println!("   Listening: ws://{}:{}/ws", config.gateway.host, config.gateway.port);
    println!("   Context:   {}", config.context.backend);
    if config.agents.is_empty() {
        println!("   Agents:    none (external agents can still connect)");
    } else {
        let names: Vec<&str> = config.agents.iter().map(|a| a.name.as_str()).collect();
        println!("   Agents:    {}", names.join(", "));
    }
    if !config.has_api_key() && !config.agents.is_empty() {
        println!("   ⚠️  No API key set; agent replies will fail until one is configured");
    }

    parley_gateway::start(config).await?;

    Ok(())
}
