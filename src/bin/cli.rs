use sentinel::utils::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging(&LogConfig::default())?;
    sentinel::cli::run().await?;
    Ok(())
}
