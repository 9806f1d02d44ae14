//! Configuration loading and app wiring.

use anyhow::Context as _;
use std::sync::Arc;
use switchyard_api::ServiceConfig;
use switchyard_core::{
    App, InitializationError, InstallationStore, MemoryInstallationStore, Receiver,
};
use tracing::info;

/// Variable naming an extra configuration file.
pub const CONFIG_FILE_ENV: &str = "SY_CONFIG_FILE";

/// Prefix of configuration overrides in the environment, e.g. `SY__SERVER__PORT=9090`.
pub const ENV_PREFIX: &str = "SY";

/// Load the service configuration.
///
/// Sources, later ones overriding earlier ones:
///  1. `/etc/switchyard/service.yaml`
///  2. `./config/service.yaml`
///  3. the file named by `SY_CONFIG_FILE`, which must exist when set
///  4. `SY__`-prefixed environment variables
///
/// Every field carries a default, so missing files are fine. A malformed
/// file or an override that does not coerce to its field type is an error.
pub fn load_config(
    explicit_path: Option<&str>,
    environment: config::Environment,
) -> Result<ServiceConfig, config::ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/switchyard/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path.filter(|path| !path.is_empty()) {
        info!(path = %path, "Loading configuration from explicit path");
        builder = builder.add_source(
            config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    builder
        .add_source(environment)
        .build()?
        .try_deserialize()
}

/// Environment source used by the binary.
pub fn process_environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

/// Build the app for `config`: token mode when a token is set, installation
/// mode otherwise.
pub async fn build_app(config: &ServiceConfig) -> anyhow::Result<App> {
    let builder = App::builder(config.app.clone());

    let app = if config.app.token.is_some() {
        builder.build()?
    } else {
        let store = Arc::new(MemoryInstallationStore::new());
        for installation in &config.installations {
            store
                .store_installation(installation.clone())
                .await
                .with_context(|| format!("storing installation {:?}", installation.team_id))?;
        }
        info!(installations = config.installations.len(), "Loaded installations");
        builder.installation_store(store).build()?
    };

    Ok(app)
}

/// Receiver verifying requests with the configured signing secret.
///
/// # Errors
///
/// `MissingSigningSecret` when the configured secret is empty.
pub fn build_receiver(app: App, config: &ServiceConfig) -> Result<Receiver, InitializationError> {
    Receiver::with_signing_secret(
        Arc::new(app),
        config.receiver.signing_secret(),
        config.receiver.response_mode(),
    )
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
