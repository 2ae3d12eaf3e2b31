//! `ragchat config` — Configuration commands.

use ragchat_config::AppConfig;

/// Print the default configuration as TOML.
pub fn show() {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
}

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = AppConfig::load()?;
    println!("   Config parsed and validated");

    if !config.has_api_key() {
        println!("   Warning: no API key set (RAGCHAT_API_KEY or OPENAI_API_KEY)");
    }

    println!();
    println!("   Engine:       {} ({})", config.provider.name, config.provider.api_url);
    println!("   Model:        {}", config.provider.model);
    println!(
        "   Tokens:       {} input / {} output",
        config.chat.max_input_tokens, config.chat.max_output_tokens
    );
    println!("   Chunks:       up to {}", config.chat.max_relevant_chunks);
    println!(
        "   History:      {} messages, {:?} expiry after {}s",
        config.conversation.max_messages, config.conversation.expiration, config.conversation.ttl_secs
    );
    Ok(())
}
