use async_trait::async_trait;

use crate::error::Result;

/// Delivers a text message to a user's registered address.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> &str;
    async fn send(&self, to: &str, text: &str) -> Result<()>;
}
