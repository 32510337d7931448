use std::sync::Arc;

use mgmtd::bus::{LoopbackBus, SystemBus};
use mgmtd::{api, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mgmtd=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    // The platform transport attaches here; the in-process bus is the
    // default wiring.
    let bus: Arc<dyn SystemBus> = Arc::new(LoopbackBus::new());

    api::routes::serve(config, bus).await
}
