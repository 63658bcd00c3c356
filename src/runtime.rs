use crate::{
    app::{AppState, build_router},
    config::Config,
    error::GateError,
    observability,
    registry::ControllerRegistry,
};
use tracing::instrument;

#[instrument(skip(config, registry), fields(controller = config.access.controller.as_str()))]
pub fn build_state(config: &Config, registry: &ControllerRegistry) -> Result<AppState, GateError> {
    let controller = registry.create(&config.access.controller, &config.access.options)?;
    Ok(AppState {
        controller,
        trust_proxy: config.trust_proxy,
    })
}

pub async fn run(config: Config, registry: ControllerRegistry) -> Result<(), GateError> {
    let bind = config.bind;
    let state = build_state(&config, &registry)?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!(
        bind = %bind,
        controller = config.access.controller.as_str(),
        trust_proxy = config.trust_proxy,
        "entitlement gate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn run_standalone(config: Config) -> Result<(), GateError> {
    let tracing_settings = observability::init_from_env(startup_log_level(&config));
    tracing::debug!(
        log_filter = tracing_settings.filter.as_str(),
        log_format = tracing_settings.log_format.as_str(),
        "initialized tracing subscriber"
    );
    run(config, ControllerRegistry::with_builtin()).await
}

pub async fn run_from_env() -> Result<(), GateError> {
    run_standalone(Config::from_env()?).await
}

fn startup_log_level(config: &Config) -> &str {
    config.log_level.as_str()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                let _ = sigterm.recv().await;
            }
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
