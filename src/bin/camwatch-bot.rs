use camwatch::adapters::telegram::{bot, client::ApiClient};
use camwatch::config::BotConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Inicializar logs (RUST_LOG=info por defecto) y cargar .env
    dotenvy::dotenv().ok();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    // 2. Token y API de camwatch
    let cfg = BotConfig::from_env()?;
    let client = ApiClient::new(&cfg.api_url)?;
    match client.status().await {
        Ok(_) => tracing::info!("🔗 API de camwatch en {}", cfg.api_url),
        Err(e) => tracing::warn!("⚠️  API de camwatch no disponible todavía ({}): {e}", cfg.api_url),
    }

    // 3. Bot
    tracing::info!("🤖 Bot de Telegram escuchando comandos...");
    bot::run(cfg.token, client).await;

    tracing::info!("👋 Bot detenido");
    Ok(())
}
