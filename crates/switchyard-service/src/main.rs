//! # Switchyard Service
//!
//! Binary entry point for the Switchyard webhook service.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes structured logging
//! - Builds the app, registers its listeners and starts the HTTP server

mod listeners;
mod settings;

use anyhow::Context as _;
use std::sync::Arc;
use switchyard_api::{start_server, ServiceError};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let explicit_path = std::env::var(settings::CONFIG_FILE_ENV).ok();
    let service_config = settings::load_config(
        explicit_path.as_deref(),
        settings::process_environment(),
    )
    .context("failed to load service configuration")?;

    init_logging(&service_config.logging);
    info!("Starting Switchyard Service");

    if let Err(e) = service_config.validate() {
        exit_with(ServiceError::from(e));
    }

    let mut app = settings::build_app(&service_config).await?;
    listeners::register(&mut app)?;
    info!(
        listeners = app.registry().len(),
        "Registered listeners"
    );

    let receiver = match settings::build_receiver(app, &service_config) {
        Ok(receiver) => Arc::new(receiver),
        Err(e) => exit_with(ServiceError::from(e)),
    };

    if let Err(e) = start_server(service_config, receiver).await {
        exit_with(e);
    }

    Ok(())
}

fn exit_with(error: ServiceError) -> ! {
    error!("Service stopped with an error: {}", error);
    std::process::exit(error.exit_code());
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &switchyard_api::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "switchyard_service={level},switchyard_api={level},switchyard_core={level},tower_http=debug",
            level = logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
