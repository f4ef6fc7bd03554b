use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{SelectorConfig, WhatsAppConfig};
use crate::openai::Completion;
use crate::platform::Channel;
use crate::transcript::{Sender, TranscriptStore};

/// Best-effort duplicate suppression: last message text observed per chat
/// display name. In-memory only, lost on restart.
#[derive(Default)]
pub struct LastSeen {
    seen: HashMap<String, String>,
}

impl LastSeen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `text` is new for this chat (first observation or
    /// changed since last cycle) and remembers it.
    pub fn observe(&mut self, chat: &str, text: &str) -> bool {
        if self.seen.get(chat).is_some_and(|prev| prev == text) {
            return false;
        }
        self.seen.insert(chat.to_string(), text.to_string());
        true
    }
}

/// Run the WhatsApp web polling loop until the shutdown flag flips.
pub async fn run(
    config: WhatsAppConfig,
    store: Arc<TranscriptStore>,
    completion: Arc<dyn Completion>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("[WhatsApp] Initializing browser...");
    let client = connect(&config).await?;

    client
        .goto("https://web.whatsapp.com")
        .await
        .context("Failed to open WhatsApp web")?;

    info!("[WhatsApp] Scan the QR code to log in.");
    if sleep_or_shutdown(Duration::from_secs(config.login_wait_secs), &mut shutdown).await {
        client.close().await.ok();
        return Ok(());
    }

    info!("[WhatsApp] Bot running. Watching for messages...");
    let mut last_seen = LastSeen::new();

    loop {
        if sleep_or_shutdown(Duration::from_secs(config.poll_interval_secs), &mut shutdown).await {
            break;
        }

        if let Err(e) = poll_chats(&client, &config, &store, completion.as_ref(), &mut last_seen).await
        {
            warn!("[WhatsApp] Poll cycle failed: {:#}", e);
        }
    }

    client.close().await.ok();
    info!("[WhatsApp] Bot stopped");
    Ok(())
}

/// Connect to the WebDriver endpoint with a persistent browser profile so
/// the QR login survives restarts.
async fn connect(config: &WhatsAppConfig) -> Result<Client> {
    let mut chrome_options: Map<String, Value> = Map::new();
    chrome_options.insert(
        "args".to_string(),
        Value::Array(vec![
            Value::String(format!("--user-data-dir={}", config.profile_dir.display())),
            Value::String("--start-maximized".to_string()),
        ]),
    );

    let mut capabilities: Map<String, Value> = Map::new();
    capabilities.insert(
        "goog:chromeOptions".to_string(),
        Value::Object(chrome_options),
    );

    let mut builder = ClientBuilder::rustls().context("Failed to initialize rustls connector")?;
    builder.capabilities(capabilities);

    builder.connect(&config.webdriver_url).await.with_context(|| {
        format!(
            "Failed to connect to WebDriver at {}. Start chromedriver first",
            config.webdriver_url
        )
    })
}

/// One polling cycle over the first few visible chats. Per-chat failures
/// skip only that chat; anything else bubbles up to the cycle-level log.
async fn poll_chats(
    client: &Client,
    config: &WhatsAppConfig,
    store: &TranscriptStore,
    completion: &dyn Completion,
    last_seen: &mut LastSeen,
) -> Result<()> {
    let rows = client
        .find_all(Locator::XPath(&config.selectors.chat_row))
        .await
        .context("Failed to list chat rows")?;

    for row in rows.into_iter().take(config.max_chats) {
        if let Err(e) = handle_chat(client, &config.selectors, store, completion, last_seen, row).await
        {
            // Stale elements and missing nodes are routine here
            debug!("[WhatsApp] Skipping chat this cycle: {:#}", e);
        }
    }

    Ok(())
}

async fn handle_chat(
    client: &Client,
    selectors: &SelectorConfig,
    store: &TranscriptStore,
    completion: &dyn Completion,
    last_seen: &mut LastSeen,
    row: fantoccini::elements::Element,
) -> Result<()> {
    let name = row
        .find(Locator::XPath(&selectors.chat_name))
        .await
        .context("Chat name not found")?
        .text()
        .await?;

    row.click().await.context("Failed to open chat")?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let bubbles = client
        .find_all(Locator::XPath(&selectors.message_bubble))
        .await
        .context("Failed to list message bubbles")?;
    let last = bubbles.into_iter().last().context("No messages in chat")?;
    let text = last.text().await?.trim().to_string();

    if !last_seen.observe(&name, &text) {
        return Ok(());
    }

    info!("[WhatsApp] New message from {}: {}", name, text);

    persist(store, &name, &text, Sender::User);
    let reply = completion.reply_text(&text).await;
    persist(store, &name, &reply, Sender::Bot);

    let compose = client
        .find(Locator::XPath(&selectors.compose_box))
        .await
        .context("Compose box not found")?;
    compose.click().await?;
    compose.send_keys(&reply).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    client
        .find(Locator::XPath(&selectors.send_button))
        .await
        .context("Send button not found")?
        .click()
        .await?;

    info!("[WhatsApp] Reply sent to {}", name);
    tokio::time::sleep(Duration::from_secs(3)).await;

    Ok(())
}

/// The scraped display name doubles as the user id for WhatsApp chats.
fn persist(store: &TranscriptStore, name: &str, text: &str, sender: Sender) {
    if let Err(e) = store.record(Channel::Whatsapp, name, name, text, sender) {
        warn!("Failed to persist transcript line: {:#}", e);
    }
}

/// Sleep for `duration`, waking early on shutdown. Returns true when the
/// shutdown flag is set.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
    *shutdown.borrow()
}
