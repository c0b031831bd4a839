use std::future::Future;

use log::{error, info, warn};
use teloxide::prelude::*;
use tokio::time::sleep;
use url::Url;

use crate::transport::TransportError;

/// Points Telegram at `url`, retrying on rate limits.
pub async fn register(bot: &Bot, url: Url, max_attempts: u32) -> bool {
    register_with_retry(max_attempts, || {
        let bot = bot.clone();
        let url = url.clone();
        async move {
            bot.set_webhook(url).await?;
            Ok(())
        }
    })
    .await
}

/// Runs `attempt` up to `max_attempts` times. A rate limit waits for the
/// server's hint (if any) and tries again; any other failure gives up at once.
pub async fn register_with_retry<F, Fut>(max_attempts: u32, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    for n in 1..=max_attempts {
        match attempt().await {
            Ok(()) => {
                info!("Webhook set successfully");
                return true;
            }
            Err(TransportError::RateLimited(retry_after)) => {
                warn!(
                    "Too many requests while setting webhook (attempt {}/{}), retry after {:?}",
                    n, max_attempts, retry_after
                );
                if let Some(delay) = retry_after {
                    sleep(delay).await;
                }
            }
            Err(e) => {
                error!("Error setting webhook: {}", e);
                return false;
            }
        }
    }

    error!("Max retries reached, failed to set webhook");
    false
}
