use murk_node::{NodeConfig, NodeServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NodeConfig::load()?;

    let password = match std::env::var("MURK_PASSWORD") {
        Ok(p) if !p.is_empty() => p,
        _ => anyhow::bail!("MURK_PASSWORD must be set to unlock or create the key bundle"),
    };

    let server = NodeServer::new(config, password.as_bytes()).await?;
    server.run().await?;

    Ok(())
}
