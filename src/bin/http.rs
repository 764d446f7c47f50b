#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use massing_tool::config::{EngineConfig, RuntimeSettings};
    use massing_tool::http_api::{self, AppState};
    use massing_tool::{NotificationLog, NotificationSink, Project};
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("massing_tool=info")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    let settings = RuntimeSettings::from_env()?;
    let addr: SocketAddr = settings.http_addr.parse()?;

    let log = Arc::new(NotificationLog::new());
    let sink: Arc<dyn NotificationSink> = log.clone();
    let project = Arc::new(Project::open(&settings, config, sink).await?);

    tracing::info!(%addr, project_id = project.id(), "massing-tool HTTP API listening");
    http_api::serve(addr, AppState::new(Arc::clone(&project), log)).await?;
    project.close();
    Ok(())
}
