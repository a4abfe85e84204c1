use std::sync::Arc;

use switchboard_core::config::AssistantsConfig;
use switchboard_core::types::AssistantType;

use crate::claude::ClaudeClient;
use crate::client::AssistantClient;
use crate::codex::CodexClient;
use crate::error::{AssistantError, Result};
use crate::opencode::OpencodeClient;

/// Builds and hands out the client matching a conversation's assistant type.
///
/// Clients are constructed once at startup; an unconfigured assistant stays
/// `None` and resolves to a descriptive error rather than a panic at
/// dispatch time.
pub struct AssistantFactory {
    claude: Option<Arc<dyn AssistantClient>>,
    codex: Option<Arc<dyn AssistantClient>>,
    opencode: Option<Arc<dyn AssistantClient>>,
}

impl AssistantFactory {
    pub fn new(config: &AssistantsConfig) -> Self {
        let non_empty = |cmd: &Option<String>| cmd.clone().filter(|c| !c.is_empty());
        Self {
            claude: non_empty(&config.claude_command)
                .map(|c| Arc::new(ClaudeClient::new(c)) as Arc<dyn AssistantClient>),
            codex: non_empty(&config.codex_command)
                .map(|c| Arc::new(CodexClient::new(c)) as Arc<dyn AssistantClient>),
            opencode: non_empty(&config.opencode_command)
                .map(|c| Arc::new(OpencodeClient::new(c)) as Arc<dyn AssistantClient>),
        }
    }

    /// Swap in a non-CLI client (in-process assistants, test doubles).
    pub fn override_client(&mut self, assistant: AssistantType, client: Arc<dyn AssistantClient>) {
        match assistant {
            AssistantType::Claude => self.claude = Some(client),
            AssistantType::Codex => self.codex = Some(client),
            AssistantType::Opencode => self.opencode = Some(client),
        }
    }

    pub fn client_for(&self, assistant: AssistantType) -> Result<Arc<dyn AssistantClient>> {
        let slot = match assistant {
            AssistantType::Claude => &self.claude,
            AssistantType::Codex => &self.codex,
            AssistantType::Opencode => &self.opencode,
        };
        slot.clone().ok_or_else(|| AssistantError::NotConfigured {
            assistant: assistant.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_claude_only() {
        let factory = AssistantFactory::new(&AssistantsConfig::default());
        assert!(factory.client_for(AssistantType::Claude).is_ok());
        assert!(matches!(
            factory.client_for(AssistantType::Codex),
            Err(AssistantError::NotConfigured { .. })
        ));
    }

    #[test]
    fn empty_command_counts_as_disabled() {
        let cfg = AssistantsConfig {
            claude_command: Some(String::new()),
            codex_command: Some("codex".into()),
            opencode_command: None,
        };
        let factory = AssistantFactory::new(&cfg);
        assert!(factory.client_for(AssistantType::Claude).is_err());
        assert!(factory.client_for(AssistantType::Codex).is_ok());
    }
}
