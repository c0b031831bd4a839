use std::error::Error;
use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, UserId};
use teloxide::utils::command::BotCommands;
use url::Url;

use crate::app::App;
use crate::helpers::truncate_message;
use crate::keyboards::{make_join_keyboard, make_subscription_keyboard, make_welcome_keyboard};
use crate::registry::{build_share_link, StoredFile};

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

const WAIT_TEXT: &str = "<b>⌛ Please Wait...</b>";
const INVALID_LINK_TEXT: &str = "Invalid or expired link. No file found.";
const NO_MEDIA_TEXT: &str = "Failed to process the file.";
const FILE_EXPIRED_TEXT: &str = "File info not found or expired.";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "open a shared file or check your subscription")]
    Start(String),
}

pub async fn command_handler(msg: Message, cmd: Command, app: Arc<App>) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        warn!("Ignoring command without a sender in chat_id: {}", msg.chat.id);
        return Ok(());
    };

    match cmd {
        Command::Start(arg) => {
            if let Err(e) = handle_start(&app, msg.chat.id, user.id, &user.first_name, &arg).await {
                error!("Failed to handle /start for chat_id: {}, error: {}", msg.chat.id, e);
            }
        }
    }

    Ok(())
}

pub async fn upload_handler(msg: Message, app: Arc<App>) -> HandlerResult {
    let uploader = msg.from.as_ref().map(|u| (u.id, u.first_name.as_str()));
    handle_upload(&app, msg.chat.id, uploader, StoredFile::from_message(&msg)).await;

    Ok(())
}

pub async fn close_handler(bot: Bot, q: CallbackQuery, app: Arc<App>) -> HandlerResult {
    if let Some(message) = &q.message {
        close_prompt(&app, message.chat().id, message.id()).await;
    }

    bot.answer_callback_query(q.id.clone()).await?;

    Ok(())
}

/// `/start` with an optional file token. Without one it reports the
/// subscription state; with one it hands out the file once the chat is
/// subscribed and the user has joined the channel.
pub async fn handle_start(
    app: &App,
    chat_id: ChatId,
    user_id: UserId,
    first_name: &str,
    arg: &str,
) -> Result<()> {
    let Some(file_token) = arg.split_whitespace().next() else {
        if !app.gate.is_active(chat_id).await? {
            return send_subscription_prompt(app, chat_id, None).await;
        }

        if passes_membership(app, user_id).await {
            send_welcome(app, chat_id, first_name).await;
        } else {
            send_force_join(app, chat_id).await?;
        }

        return Ok(());
    };

    let Some(file) = app.registry.lookup(file_token).await? else {
        info!("Unknown file token {} requested by chat_id: {}", file_token, chat_id);
        send_logged(app, chat_id, INVALID_LINK_TEXT).await;
        return Ok(());
    };

    if !app.gate.is_active(chat_id).await? {
        return send_subscription_prompt(app, chat_id, Some(file_token)).await;
    }

    if !passes_membership(app, user_id).await {
        return send_force_join(app, chat_id).await;
    }

    if let Err(e) = app.delivery.deliver(chat_id, &file).await {
        error!("Failed to deliver file to chat_id: {}, error: {}", chat_id, e);
    }

    Ok(())
}

/// Registers an admin upload and answers with its share link. Anything
/// outside the upload chat, or from a non-admin, is ignored.
pub async fn handle_upload(
    app: &App,
    chat_id: ChatId,
    uploader: Option<(UserId, &str)>,
    file: Option<StoredFile>,
) {
    let Some((_, first_name)) =
        uploader.filter(|(id, _)| app.access.may_upload(chat_id, Some(*id)))
    else {
        return;
    };

    let Some(file) = file else {
        if let Err(e) = app.transport.send_plain(chat_id, NO_MEDIA_TEXT).await {
            error!("Failed to send message to chat_id: {}, error: {}", chat_id, e);
        }
        return;
    };

    if let Err(e) = share_upload(app, chat_id, first_name, &file).await {
        error!("Failed to share upload in chat_id: {}, error: {}", chat_id, e);

        let report = truncate_message(&format!("Error: {}", e));
        if let Err(e) = app.transport.send_plain(chat_id, &report).await {
            error!("Failed to report upload error to chat_id: {}, error: {}", chat_id, e);
        }
    }
}

async fn share_upload(app: &App, chat_id: ChatId, first_name: &str, file: &StoredFile) -> Result<()> {
    let placeholder = app.transport.send_text(chat_id, WAIT_TEXT, None).await?;
    let token = app.registry.store(file).await?;
    let link = build_share_link(&app.bot_username, &token);

    let text = format!(
        "<b>{}, your file is stored!</b>\n\nUse this link to access it 🔗:\n<code>{}</code>\n\n{}",
        html_escape::encode_text(first_name),
        link,
        link
    );
    app.transport.edit_text(chat_id, placeholder, &text).await?;

    Ok(())
}

/// Removes the message carrying the "Close" button. The message may already
/// be gone, so failures only get logged.
pub async fn close_prompt(app: &App, chat_id: ChatId, message_id: MessageId) {
    if let Err(e) = app.transport.delete_message(chat_id, message_id).await {
        warn!("Failed to close message {} in chat_id: {}, error: {}", message_id.0, chat_id, e);
    }
}

/// Follow-up once the web flow has verified `chat_id`: announce the grant
/// and deliver the file the user originally asked for. Best effort.
pub async fn complete_verification(app: &App, chat_id: ChatId, file_token: Option<&str>) {
    send_logged(app, chat_id, &verified_text(app)).await;

    let Some(file_token) = file_token.filter(|t| !t.is_empty()) else {
        return;
    };

    match app.registry.lookup(file_token).await {
        Ok(Some(file)) => {
            if let Err(e) = app.delivery.deliver(chat_id, &file).await {
                error!("Failed to deliver file to chat_id: {}, error: {}", chat_id, e);
            }
        }
        Ok(None) => send_logged(app, chat_id, FILE_EXPIRED_TEXT).await,
        Err(e) => error!("Failed to look up file token {}: {}", file_token, e),
    }
}

fn verified_text(app: &App) -> String {
    format!(
        "Subscription verified! You can now access your files for the next {} minutes.",
        app.grant.num_minutes()
    )
}

/// Membership fails closed: an API error counts as "not a member".
async fn passes_membership(app: &App, user: UserId) -> bool {
    if app.access.skips_membership(user) || app.access.channel_bypassed(&app.channel) {
        return true;
    }

    match app.transport.is_member(&app.channel, user).await {
        Ok(is_member) => is_member,
        Err(e) => {
            error!("Error checking membership for user {}: {}", user.0, e);
            false
        }
    }
}

async fn send_subscription_prompt(app: &App, chat_id: ChatId, file_token: Option<&str>) -> Result<()> {
    let token = app.gate.issue_token(chat_id).await?;
    let link = app.verification_link(&token, file_token)?;

    let text = format!(
        "Your Ads token has expired or you have not subscribed yet. Please refresh your token and subscribe.\n\n\
         Token Timeout: <b>{} Minutes</b>\n\n\
         <b>What is the token?</b>\n\
         This is an ads token. After completing the ads process, you can use the bot for {} minutes.",
        app.token_timeout.num_minutes(),
        app.grant.num_minutes()
    );

    if let Err(e) = app
        .transport
        .send_text(chat_id, &text, Some(make_subscription_keyboard(link)))
        .await
    {
        error!("Failed to send subscription prompt to chat_id: {}, error: {}", chat_id, e);
    }

    Ok(())
}

async fn send_welcome(app: &App, chat_id: ChatId, first_name: &str) {
    let text = format!(
        "Hello, <b>{}</b>! 😉\n\nYou have successfully subscribed and joined our channel.",
        html_escape::encode_text(first_name)
    );

    if let Err(e) = app
        .transport
        .send_text(chat_id, &text, Some(make_welcome_keyboard(app.community_url.clone())))
        .await
    {
        error!("Failed to send welcome to chat_id: {}, error: {}", chat_id, e);
    }
}

async fn send_force_join(app: &App, chat_id: ChatId) -> Result<()> {
    let link = match &app.channel_url {
        Some(url) => url.clone(),
        None => Url::parse(&app.transport.channel_link(&app.channel).await?)?,
    };

    let text = "<b>You need to join our compulsory channel 😇\n\nClick the link below to join 🔗:</b>";
    if let Err(e) = app
        .transport
        .send_text(chat_id, text, Some(make_join_keyboard(link)))
        .await
    {
        error!("Failed to send join request to chat_id: {}, error: {}", chat_id, e);
    }

    Ok(())
}

async fn send_logged(app: &App, chat_id: ChatId, text: &str) {
    if let Err(e) = app.transport.send_text(chat_id, text, None).await {
        error!("Failed to send message to chat_id: {}, error: {}", chat_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FileKind;
    use crate::testing::{test_app, Sent, ADMIN, OWNER, UPLOAD_CHAT};

    fn private(user: UserId) -> ChatId {
        ChatId(user.0 as i64)
    }

    #[tokio::test]
    async fn test_start_without_subscription_issues_token() {
        let (app, transport) = test_app().await;
        let alice = UserId(1001);

        handle_start(&app, private(alice), alice, "Alice", "").await.unwrap();

        let record = app.gate.subscription(private(alice)).await.unwrap().unwrap();
        assert!(!record.verified);
        assert!(record.subscribed_until.is_none());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let text = sent[0].text().unwrap();
        assert!(text.contains("Token Timeout: <b>2 Minutes</b>"));
        assert!(text.contains("use the bot for 10 minutes"));
        assert_eq!(
            sent[0].urls(),
            vec![format!("https://gate.example.com/verify/{}", record.token)]
        );
    }

    #[tokio::test]
    async fn test_verified_member_is_welcomed() {
        let (app, transport) = test_app().await;
        let alice = UserId(1001);
        transport.add_member(alice);

        handle_start(&app, private(alice), alice, "Alice", "").await.unwrap();
        let token = app.gate.subscription(private(alice)).await.unwrap().unwrap().token;
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(alice), alice, "Alice <3", "").await.unwrap();

        let last = transport.sent().pop().unwrap();
        assert!(last.text().unwrap().contains("Hello, <b>Alice &lt;3</b>!"));
        let record = app.gate.subscription(private(alice)).await.unwrap().unwrap();
        assert_eq!(record.token, token);
    }

    #[tokio::test]
    async fn test_subscribed_non_member_must_join() {
        let (app, transport) = test_app().await;
        let bob = UserId(2002);
        let token = app.gate.issue_token(private(bob)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(bob), bob, "Bob", "").await.unwrap();

        let last = transport.sent().pop().unwrap();
        assert!(last.text().unwrap().contains("compulsory channel"));
        assert_eq!(last.urls(), vec!["https://t.me/examplechannel".to_string()]);
    }

    #[tokio::test]
    async fn test_membership_check_fails_closed() {
        let (app, transport) = test_app().await;
        let bob = UserId(2002);
        transport.add_member(bob);
        transport.fail_membership();
        let token = app.gate.issue_token(private(bob)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(bob), bob, "Bob", "").await.unwrap();

        let last = transport.sent().pop().unwrap();
        assert!(last.text().unwrap().contains("compulsory channel"));
    }

    #[tokio::test]
    async fn test_owner_skips_membership() {
        let (app, transport) = test_app().await;
        let owner = OWNER;
        let token = app.gate.issue_token(private(owner)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(owner), owner, "Owner", "").await.unwrap();

        let last = transport.sent().pop().unwrap();
        assert!(last.text().unwrap().starts_with("Hello, <b>Owner</b>"));
    }

    #[tokio::test]
    async fn test_unknown_file_token_changes_nothing() {
        let (app, transport) = test_app().await;
        let carol = UserId(3003);

        handle_start(&app, private(carol), carol, "Carol", "does-not-exist").await.unwrap();

        assert!(app.gate.subscription(private(carol)).await.unwrap().is_none());
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text(), Some(INVALID_LINK_TEXT));
    }

    #[tokio::test]
    async fn test_file_link_without_subscription_carries_file_token() {
        let (app, transport) = test_app().await;
        let carol = UserId(3003);
        let file_token = app
            .registry
            .store(&StoredFile::new("vid-1", FileKind::Video))
            .await
            .unwrap();

        handle_start(&app, private(carol), carol, "Carol", &file_token).await.unwrap();

        let record = app.gate.subscription(private(carol)).await.unwrap().unwrap();
        assert_eq!(
            transport.sent()[0].urls()[0],
            format!(
                "https://gate.example.com/verify/{}?file_token={}",
                record.token, file_token
            )
        );
        assert!(transport.files_sent().is_empty());
    }

    #[tokio::test]
    async fn test_file_link_delivers_to_subscribed_member() {
        let (app, transport) = test_app().await;
        let carol = UserId(3003);
        transport.add_member(carol);
        let file = StoredFile::new("doc-1", FileKind::Document);
        let file_token = app.registry.store(&file).await.unwrap();
        let token = app.gate.issue_token(private(carol)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(carol), carol, "Carol", &file_token).await.unwrap();

        assert_eq!(transport.files_sent(), vec![(private(carol), file)]);
    }

    #[tokio::test]
    async fn test_start_uses_first_word_as_file_token() {
        let (app, transport) = test_app().await;
        let carol = UserId(3003);
        transport.add_member(carol);
        let file = StoredFile::new("doc-2", FileKind::Document);
        let file_token = app.registry.store(&file).await.unwrap();
        let token = app.gate.issue_token(private(carol)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        let arg = format!("{} trailing words", file_token);
        handle_start(&app, private(carol), carol, "Carol", &arg).await.unwrap();

        assert_eq!(transport.files_sent(), vec![(private(carol), file)]);
    }

    #[tokio::test]
    async fn test_file_link_for_non_member_is_withheld() {
        let (app, transport) = test_app().await;
        let dave = UserId(4004);
        let file_token = app
            .registry
            .store(&StoredFile::new("pic", FileKind::Photo))
            .await
            .unwrap();
        let token = app.gate.issue_token(private(dave)).await.unwrap();
        app.gate.finalize(&token, app.grant).await.unwrap();

        handle_start(&app, private(dave), dave, "Dave", &file_token).await.unwrap();

        assert!(transport.files_sent().is_empty());
        assert!(transport.sent()[0].text().unwrap().contains("compulsory channel"));
    }

    #[tokio::test]
    async fn test_admin_upload_is_shared() {
        let (app, transport) = test_app().await;
        let admin = ADMIN;
        let file = StoredFile::new("vid-9", FileKind::Video);

        handle_upload(&app, UPLOAD_CHAT, Some((admin, "Admin")), Some(file.clone())).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text(), Some(WAIT_TEXT));
        let Sent::Edit { message_id, text, .. } = &sent[1] else {
            panic!("expected the placeholder to be edited, got {:?}", sent[1]);
        };
        assert_eq!(*message_id, MessageId(1));

        let token = text
            .split("https://t.me/media_gate_bot?start=")
            .nth(1)
            .and_then(|rest| rest.split('<').next())
            .unwrap();
        assert_eq!(app.registry.lookup(token).await.unwrap(), Some(file));
        assert_eq!(app.registry.db().count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_uploads_outside_policy_are_ignored() {
        let (app, transport) = test_app().await;
        let file = StoredFile::new("vid-9", FileKind::Video);

        handle_upload(&app, UPLOAD_CHAT, Some((UserId(5005), "Eve")), Some(file.clone())).await;
        handle_upload(&app, ChatId(-1), Some((ADMIN, "Admin")), Some(file.clone())).await;
        handle_upload(&app, UPLOAD_CHAT, None, Some(file)).await;

        assert!(transport.sent().is_empty());
        assert_eq!(app.registry.db().count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_media_is_reported() {
        let (app, transport) = test_app().await;

        handle_upload(&app, UPLOAD_CHAT, Some((ADMIN, "Admin")), None).await;

        assert_eq!(
            transport.sent(),
            vec![Sent::Plain {
                chat_id: UPLOAD_CHAT,
                text: NO_MEDIA_TEXT.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_close_deletes_prompt_and_tolerates_failure() {
        let (app, transport) = test_app().await;

        close_prompt(&app, ChatId(1), MessageId(10)).await;
        assert_eq!(transport.deleted(), vec![(ChatId(1), MessageId(10))]);

        transport.fail_deletes();
        close_prompt(&app, ChatId(1), MessageId(11)).await;
        assert_eq!(transport.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_verification_with_expired_file() {
        let (app, transport) = test_app().await;

        complete_verification(&app, ChatId(1), Some("gone")).await;

        let texts: Vec<_> = transport
            .sent()
            .iter()
            .filter_map(|s| s.text().map(str::to_string))
            .collect();
        assert_eq!(
            texts,
            vec![
                "Subscription verified! You can now access your files for the next 10 minutes."
                    .to_string(),
                FILE_EXPIRED_TEXT.to_string()
            ]
        );
        assert!(transport.files_sent().is_empty());
    }
}
