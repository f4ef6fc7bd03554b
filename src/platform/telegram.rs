use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::openai::Completion;
use crate::platform::{split_message, Channel};
use crate::transcript::{Sender, TranscriptStore};

/// The fields of a Telegram user the relay cares about.
#[derive(Debug, Clone)]
pub struct RelayUser {
    pub id: String,
    /// Username when set, first name otherwise.
    pub display_name: String,
    pub first_name: String,
}

/// Run the Telegram long-polling dispatcher until the shutdown flag flips.
pub async fn run(
    bot: Bot,
    store: Arc<TranscriptStore>,
    completion: Arc<dyn Completion>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("Starting Telegram bot...");

    let handler = Update::filter_message().endpoint(handle_message);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![store, completion])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
        if let Ok(done) = token.shutdown() {
            done.await;
        }
    });

    dispatcher.dispatch().await;
    info!("Telegram bot stopped");
    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    store: Arc<TranscriptStore>,
    completion: Arc<dyn Completion>,
) -> ResponseResult<()> {
    let from = match msg.from.as_ref() {
        Some(user) => user,
        None => return Ok(()),
    };
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    let user = RelayUser {
        id: from.id.0.to_string(),
        display_name: from
            .username
            .clone()
            .unwrap_or_else(|| from.first_name.clone()),
        first_name: from.first_name.clone(),
    };

    info!("Telegram message from {} ({}): {}", user.display_name, user.id, text);

    if text == "/start" {
        let reply = handle_start(&store, &user);
        bot.send_message(msg.chat.id, reply).await?;
        return Ok(());
    }

    let img_prompt = text
        .strip_prefix("/img")
        .filter(|rest| rest.is_empty() || rest.starts_with(' '));
    if let Some(prompt) = img_prompt {
        // Only show the upload indicator once we know a generation will run
        if !prompt.trim().is_empty() {
            bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::UploadPhoto)
                .await
                .ok();
        }

        match handle_img(&store, completion.as_ref(), &user, prompt).await {
            ImgOutcome::Usage => {
                bot.send_message(
                    msg.chat.id,
                    "Por favor, envie um texto para gerar a imagem após o comando /img",
                )
                .await?;
            }
            ImgOutcome::Photo(url) => match reqwest::Url::parse(&url) {
                Ok(parsed) => {
                    bot.send_photo(msg.chat.id, InputFile::url(parsed)).await?;
                }
                Err(_) => {
                    bot.send_message(msg.chat.id, url).await?;
                }
            },
            ImgOutcome::Error(message) => {
                bot.send_message(msg.chat.id, message).await?;
            }
        }
        return Ok(());
    }

    bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
        .await
        .ok();

    let reply = handle_text(&store, completion.as_ref(), &user, &text).await;
    for chunk in split_message(&reply, 4000) {
        bot.send_message(msg.chat.id, chunk).await.ok();
    }

    Ok(())
}

fn persist(store: &TranscriptStore, user: &RelayUser, text: &str, sender: Sender) {
    if let Err(e) = store.record(Channel::Telegram, &user.id, &user.display_name, text, sender) {
        warn!("Failed to persist transcript line: {:#}", e);
    }
}

/// Greeting for `/start`; the command itself is logged as a user line.
fn handle_start(store: &TranscriptStore, user: &RelayUser) -> String {
    persist(store, user, "/start", Sender::User);
    format!(
        "Olá, {}! Me envie uma pergunta e eu responderei com inteligência artificial. \
         Se quiser uma imagem, use o comando /img seguido do que deseja.",
        user.first_name
    )
}

/// Plain text message: log it, ask the model, log and return the reply.
/// `reply_text` folds API failures into the reply, so both lines are always
/// written.
async fn handle_text(
    store: &TranscriptStore,
    completion: &dyn Completion,
    user: &RelayUser,
    text: &str,
) -> String {
    persist(store, user, text, Sender::User);
    let reply = completion.reply_text(text).await;
    persist(store, user, &reply, Sender::Bot);
    reply
}

enum ImgOutcome {
    /// Empty prompt: usage hint only, nothing recorded, no API call.
    Usage,
    Photo(String),
    Error(String),
}

async fn handle_img(
    store: &TranscriptStore,
    completion: &dyn Completion,
    user: &RelayUser,
    prompt: &str,
) -> ImgOutcome {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return ImgOutcome::Usage;
    }

    persist(store, user, &format!("/img {}", prompt), Sender::User);

    match completion.generate_image(prompt).await {
        Ok(url) => {
            persist(store, user, &format!("Imagem gerada: {}", url), Sender::Bot);
            ImgOutcome::Photo(url)
        }
        Err(e) => {
            let message = format!("Erro ao gerar imagem: {}", e);
            persist(store, user, &message, Sender::Bot);
            ImgOutcome::Error(message)
        }
    }
}
