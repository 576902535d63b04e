//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources every
//! call shares: the session registry, tool invoker, config builder, and the
//! realtime connector.

use crate::{
    config::Config,
    ws::{
        provider::{RealtimeConnector, openai::OpenAiConnector},
        session::{SessionDeps, SessionSettings},
    },
};
use anyhow::Context;
use callbridge_core::{
    call_control::{CallControl, TwilioCallControl},
    registry::SessionRegistry,
    search::BingSearch,
    session_config::SessionConfigBuilder,
    tools::ToolInvoker,
};
use std::{path::Path, sync::Arc};
use tracing::{info, warn};

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub tools: Arc<ToolInvoker>,
    pub config_builder: Arc<SessionConfigBuilder>,
    pub realtime: Arc<dyn RealtimeConnector>,
}

impl AppState {
    /// Wires the providers described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let search = BingSearch::new(config.bing_api_key.clone())
            .context("Failed to build the web search client")?;
        if config.bing_api_key.is_none() {
            warn!("BING_API_KEY is not set; search tool calls will report an error");
        }
        let mut tools = ToolInvoker::new(Arc::new(search));

        let mut config_builder = SessionConfigBuilder::new(config.profile);
        if let Some(voice) = &config.voice {
            config_builder = config_builder.voice(voice);
        }
        if let Some(prompts_path) = &config.prompts_path {
            config_builder = config_builder.instructions(load_system_prompt(prompts_path)?);
        }

        if let Some(twilio) = &config.twilio {
            let call_control: Arc<dyn CallControl> = Arc::new(
                TwilioCallControl::new(twilio.account_sid.clone(), twilio.auth_token.clone())
                    .context("Failed to build the call control client")?,
            );
            config_builder = config_builder.call_control(call_control.clone());
            if let Some(destination) = &config.transfer_number {
                tools = tools.with_transfer(call_control, destination);
            }
        }

        let realtime = OpenAiConnector::new(
            config.realtime_url.clone(),
            config.realtime_model.clone(),
            config.openai_api_key.clone(),
            config.log_event_types.iter().cloned(),
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            tools: Arc::new(tools),
            config_builder: Arc::new(config_builder),
            realtime: Arc::new(realtime),
        })
    }

    /// The collaborators handed to each new bridge session.
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            connector: self.realtime.clone(),
            config_builder: self.config_builder.clone(),
            tools: self.tools.clone(),
            registry: self.registry.clone(),
            settings: SessionSettings {
                config_delay: self.config.config_delay,
                activation_timeout: self.config.activation_timeout,
                tool_timeout: self.config.tool_timeout,
                setup_timeout: self.config.setup_timeout,
            },
        }
    }
}

/// Reads `system_prompt.md` from the prompts directory.
fn load_system_prompt(prompts_path: &Path) -> anyhow::Result<String> {
    let path = prompts_path.join("system_prompt.md");
    let prompt = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
    info!(path = %path.display(), "Loaded system prompt");
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::session_config::SessionProfile;
    use secrecy::SecretString;
    use std::{path::PathBuf, time::Duration};
    use tracing::Level;

    fn config(prompts_path: Option<PathBuf>) -> Config {
        Config {
            bind_address: "127.0.0.1:5050".parse().unwrap(),
            public_host: None,
            tls: None,
            openai_api_key: SecretString::from("test-openai-key".to_string()),
            realtime_url: "ws://127.0.0.1:1/realtime".to_string(),
            realtime_model: "test-model".to_string(),
            profile: SessionProfile::Assistant,
            voice: Some("alloy".to_string()),
            prompts_path,
            transfer_number: None,
            twilio: None,
            bing_api_key: None,
            log_event_types: vec![],
            config_delay: Duration::from_millis(10),
            activation_timeout: Duration::from_millis(20),
            tool_timeout: Duration::from_secs(3),
            setup_timeout: Duration::from_secs(4),
            log_level: Level::INFO,
        }
    }

    #[test]
    fn session_deps_carry_configured_timings() {
        let state = AppState::from_config(config(None)).unwrap();
        let deps = state.session_deps();

        assert_eq!(deps.settings.config_delay, Duration::from_millis(10));
        assert_eq!(deps.settings.activation_timeout, Duration::from_millis(20));
        assert_eq!(deps.settings.tool_timeout, Duration::from_secs(3));
        assert_eq!(deps.settings.setup_timeout, Duration::from_secs(4));
        assert!(Arc::ptr_eq(&deps.registry, &state.registry));
    }

    #[test]
    fn system_prompt_overrides_instructions() {
        let dir = std::env::temp_dir().join(format!("callbridge-prompts-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("system_prompt.md"), "Be brief.").unwrap();

        let state = AppState::from_config(config(Some(dir.clone()))).unwrap();
        let session = state
            .config_builder
            .build(&callbridge_core::call::CallIdentity::new("S1", None));

        assert_eq!(session.instructions, "Be brief.");
        assert_eq!(session.voice, "alloy");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_prompts_directory_is_an_error() {
        let missing = PathBuf::from("/nonexistent/callbridge/prompts");
        assert!(AppState::from_config(config(Some(missing))).is_err());
    }
}
