use castline_bridge::MessageFromBackend;
use castline_bridge::config::Config;
use castline_bridge::notification::NotificationType;

use super::session_service::SessionService;

/// Handles an incoming configuration request (see
/// [`castline_bridge::MessageToBackend::ConfigurationRequest`]).
pub async fn handle_config_request(context: super::AppContextHandle) {
    let config = {
        let state = context.state.read().await;
        state.config.clone()
    };
    context
        .send(MessageFromBackend::ConfigurationResponse(config))
        .await;
}

/// Replaces the configuration, persists it and lets the session re-resolve
/// its endpoint. A failed write is reported but the new configuration still
/// takes effect for this run.
pub async fn handle_config_update(
    context: super::AppContextHandle,
    session: &mut SessionService,
    config: Config,
) {
    let config_path = {
        let mut state = context.state.write().await;
        state.config = config.clone();
        state.config_path.clone()
    };

    match config_path {
        Some(path) => {
            if let Err(err) = crate::config::save_config(&path, &config).await {
                log::error!("Failed to save configuration to {path:?}: {err}");
                context
                    .send_notification(
                        NotificationType::Error,
                        format!("Failed to save configuration: {err}"),
                    )
                    .await;
            }
        }
        None => log::warn!("No configuration path, keeping changes in memory only"),
    }

    session.configuration_changed(&context, &config).await;
    context
        .send(MessageFromBackend::ConfigurationResponse(config))
        .await;
}
