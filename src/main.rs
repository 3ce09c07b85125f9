#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Logging is initialized inside cli::run once the config file is known,
    // so the optional log-file layer can be attached.
    etariff_harvest::cli::run().await
}
