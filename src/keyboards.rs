use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

pub const CLOSE_CALLBACK: &str = "close";

fn close_button() -> InlineKeyboardButton {
    InlineKeyboardButton::callback("Close", CLOSE_CALLBACK)
}

/// One button per row: the verification link, then "Close".
pub fn make_subscription_keyboard(link: Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::url("Subscribe Here", link)],
        vec![close_button()],
    ])
}

pub fn make_join_keyboard(link: Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url("Join Channel", link)]])
}

pub fn make_welcome_keyboard(community: Option<Url>) -> InlineKeyboardMarkup {
    let mut row = Vec::with_capacity(2);
    if let Some(community) = community {
        row.push(InlineKeyboardButton::url("Chat Channel", community));
    }
    row.push(close_button());

    InlineKeyboardMarkup::new(vec![row])
}
