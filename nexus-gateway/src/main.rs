use envconfig::Envconfig;
use nexus_gateway::{Config, observability, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env()?;
    observability::init_tracing("info", config.json_logs())?;
    if let Err(e) = run(config).await {
        tracing::error!(error = ?e, "gateway failed");
        return Err(e);
    }
    Ok(())
}
