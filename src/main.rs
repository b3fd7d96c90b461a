use dogcat_demo::{config, start_app};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration().expect("failed to load config");
    init_tracing(config.log_level.as_str());

    start_app(config).await?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    let default_filter = format!("{},ort=info", log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}
