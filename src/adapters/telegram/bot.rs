use teloxide::{
    adaptors::{throttle::Limits, Throttle},
    prelude::*,
    types::{ChatId, InputFile},
    utils::command::BotCommands,
};

use super::client::{ApiClient, ApiError};
use super::replies::{
    decode_photo, format_settings, object_caption, parse_receiver, parse_settings_change, status_text,
};

type CamBot = Throttle<Bot>;

#[derive(Clone, BotCommands)]
#[command(rename_rule = "lowercase", description = "Comandos disponibles:")]
pub enum Command {
    #[command(description = "muestra esta ayuda.")]
    Help,
    #[command(description = "foto actual con todos los objetos detectados.")]
    CurrentState,
    #[command(description = "última vez que se vio un objeto: /whereis <etiqueta>.")]
    WhereIs(String),
    #[command(description = "ajustes actuales: /getsettings <camera|model>.")]
    GetSettings(String),
    #[command(description = "cambia ajustes: /changesettings <camera|model> clave=valor ...")]
    ChangeSettings(String),
}

/// Atiende comandos hasta Ctrl-C.
pub async fn run(token: String, client: ApiClient) {
    let bot = Bot::new(token).throttle(Limits::default());
    let handler = Update::filter_message().filter_command::<Command>().endpoint(answer);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![client])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn answer(bot: CamBot, msg: Message, cmd: Command, client: ApiClient) -> ResponseResult<()> {
    let chat = msg.chat.id;
    tracing::debug!(chat = ?chat, "comando recibido");

    match cmd {
        Command::Help => {
            bot.send_message(chat, Command::descriptions().to_string()).await?;
        }
        Command::CurrentState => match client.objects().await {
            Ok(photo) => send_photo(&bot, chat, decode_photo(&photo).ok(), None).await?,
            Err(e) => reply_error(&bot, chat, e).await?,
        },
        Command::WhereIs(name) => {
            let name = name.trim();
            if name.is_empty() {
                bot.send_message(chat, "Uso: /whereis <etiqueta>").await?;
                return Ok(());
            }
            match client.object(name).await {
                Ok(object) => {
                    let caption = object_caption(&object);
                    send_photo(&bot, chat, decode_photo(&object.photo).ok(), Some(caption)).await?
                }
                Err(e) => reply_error(&bot, chat, e).await?,
            }
        }
        Command::GetSettings(receiver) => {
            let text = match parse_receiver(&receiver) {
                Ok(receiver) => match client.settings(receiver).await {
                    Ok(payload) => format_settings(&payload),
                    Err(e) => format!("❌ {e}"),
                },
                Err(e) => format!("❌ {e}"),
            };
            bot.send_message(chat, text).await?;
        }
        Command::ChangeSettings(args) => {
            let text = match parse_settings_change(&args) {
                Ok(payload) => match client.update_settings(&payload).await {
                    Ok(()) => match client.status().await {
                        Ok(status) => format!("✅ Ajustes guardados\n{}", status_text(&status)),
                        Err(_) => "✅ Ajustes guardados".to_string(),
                    },
                    Err(e) => format!("❌ {e}"),
                },
                Err(e) => format!("❌ {e}"),
            };
            bot.send_message(chat, text).await?;
        }
    }
    Ok(())
}

async fn send_photo(bot: &CamBot, chat: ChatId, jpeg: Option<Vec<u8>>, caption: Option<String>) -> ResponseResult<()> {
    let Some(jpeg) = jpeg.filter(|b| !b.is_empty()) else {
        let text = caption.unwrap_or_else(|| "📭 Todavía no hay foto disponible".to_string());
        bot.send_message(chat, text).await?;
        return Ok(());
    };
    let request = bot.send_photo(chat, InputFile::memory(jpeg).file_name("camwatch.jpg"));
    match caption {
        Some(caption) => request.caption(caption).await?,
        None => request.await?,
    };
    Ok(())
}

async fn reply_error(bot: &CamBot, chat: ChatId, error: ApiError) -> ResponseResult<()> {
    let text = match &error {
        ApiError::NotFound(message) => format!("🔍 {message}"),
        other => {
            tracing::warn!("⚠️  API de camwatch: {other}");
            format!("❌ {other}")
        }
    };
    bot.send_message(chat, text).await?;
    Ok(())
}
