use colored::Colorize;
use stackflow_config::EngineConfig;

pub fn handle(config: &EngineConfig) -> anyhow::Result<()> {
    match stackflow_config::find_config_file() {
        Ok(path) => eprintln!("{} {}", "Config file:".dimmed(), path.display()),
        Err(_) => eprintln!("{}", "No config file found, using defaults".dimmed()),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
