use rand::distr::{Alphanumeric, SampleString};
use uuid::Uuid;

pub const TELEGRAM_TEXT_MAX_LENGTH: usize = 4096;
pub const SUBSCRIPTION_TOKEN_RANDOM_LEN: usize = 11;

/// Subscription session token: a random prefix followed by the owning chat id,
/// so two users can never be handed the same token.
pub fn generate_subscription_token(chat_id: i64) -> String {
    let random = Alphanumeric.sample_string(&mut rand::rng(), SUBSCRIPTION_TOKEN_RANDOM_LEN);
    format!("{}_{}", random, chat_id)
}

pub fn generate_file_token() -> String {
    Uuid::new_v4().to_string()
}

/// Cuts `text` to the Telegram message limit on a char boundary.
pub fn truncate_message(text: &str) -> String {
    text.chars().take(TELEGRAM_TEXT_MAX_LENGTH).collect()
}

pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
