use coil_kiosk::{KioskConfig, Runtime};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    tracing_subscriber::fmt::init();
    color_eyre::install()?;

    let args: Vec<String> = std::env::args().collect();
    let path = KioskConfig::resolve_path(&args);
    let config = KioskConfig::load_or_default(&path)?;

    Runtime::new(config)?.run().await?;
    Ok(())
}
