#[derive(sqlx::FromRow, Debug, Clone)]
pub struct SubscriptionDto {
    pub chat_id: i64,
    pub unique_id: String,
    pub subscribed_until: Option<i64>,
    pub verified: bool,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct StoredFileDto {
    pub file_id: String,
    pub file_type: String,
}
