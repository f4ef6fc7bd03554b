use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub transcripts: TranscriptConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Bot token; the TELEGRAM_TOKEN env var takes precedence.
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    /// API key; the OPENAI_API_KEY env var takes precedence.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptConfig {
    #[serde(default = "default_transcript_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsAppConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    #[serde(default = "default_login_wait_secs")]
    pub login_wait_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_chats")]
    pub max_chats: usize,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// DOM selectors for the WhatsApp web client. The page's markup is not a
/// stable contract, so these live in config rather than code.
#[derive(Debug, Deserialize, Clone)]
pub struct SelectorConfig {
    #[serde(default = "default_chat_row")]
    pub chat_row: String,
    #[serde(default = "default_chat_name")]
    pub chat_name: String,
    #[serde(default = "default_message_bubble")]
    pub message_bubble: String,
    #[serde(default = "default_compose_box")]
    pub compose_box: String,
    #[serde(default = "default_send_button")]
    pub send_button: String,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_system_prompt() -> String {
    "Você é um assistente útil.".to_string()
}

fn default_image_size() -> String {
    "512x512".to_string()
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from("conversations")
}

fn default_true() -> bool {
    true
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("whatsapp_profile")
}

fn default_login_wait_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_chats() -> usize {
    5
}

fn default_chat_row() -> String {
    r#"//div[@role="row"]"#.to_string()
}

fn default_chat_name() -> String {
    r#".//span[contains(@class,"ggj6brxn")]"#.to_string()
}

fn default_message_bubble() -> String {
    r#"//div[contains(@class,"message-in") or contains(@class,"message-out")]"#.to_string()
}

fn default_compose_box() -> String {
    r#"//div[@title="Digite uma mensagem"]"#.to_string()
}

fn default_send_button() -> String {
    r#"//span[@data-icon="send"]"#.to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            image_size: default_image_size(),
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            directory: default_transcript_dir(),
        }
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            webdriver_url: default_webdriver_url(),
            profile_dir: default_profile_dir(),
            login_wait_secs: default_login_wait_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_chats: default_max_chats(),
            selectors: SelectorConfig::default(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            chat_row: default_chat_row(),
            chat_name: default_chat_name(),
            message_bubble: default_message_bubble(),
            compose_box: default_compose_box(),
            send_button: default_send_button(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when the file
    /// does not exist. TELEGRAM_TOKEN and OPENAI_API_KEY env vars override
    /// their file counterparts; both must end up non-empty.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            if !token.is_empty() {
                config.telegram.bot_token = token;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                config.openai.api_key = key;
            }
        }

        if config.telegram.bot_token.is_empty() {
            anyhow::bail!(
                "Telegram bot token missing: set TELEGRAM_TOKEN or [telegram].bot_token"
            );
        }
        if config.openai.api_key.is_empty() {
            anyhow::bail!("OpenAI API key missing: set OPENAI_API_KEY or [openai].api_key");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "123:abc"

            [openai]
            api_key = "sk-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.openai.max_tokens, 1000);
        assert_eq!(config.whatsapp.poll_interval_secs, 5);
        assert_eq!(config.whatsapp.max_chats, 5);
        assert_eq!(config.transcripts.directory, PathBuf::from("conversations"));
        assert!(config.whatsapp.selectors.chat_row.contains("row"));
    }

    #[test]
    fn test_selector_override() {
        let config: Config = toml::from_str(
            r#"
            [whatsapp.selectors]
            compose_box = '//div[@title="Type a message"]'
            "#,
        )
        .unwrap();

        assert_eq!(
            config.whatsapp.selectors.compose_box,
            r#"//div[@title="Type a message"]"#
        );
        // Untouched selectors keep their defaults
        assert!(config.whatsapp.selectors.send_button.contains("send"));
    }
}
