//! Terminal prompt standing in for a mailbox reader.

use async_trait::async_trait;
use dialoguer::Input;

use arlo_core::{CoreError, MailboxConnection, OneTimeCodeSource};

/// Asks the user to type the one-time code from their inbox.
pub struct PromptCodeSource;

#[async_trait]
impl OneTimeCodeSource for PromptCodeSource {
    async fn fetch_code(&self, connection: &MailboxConnection, _subject: &str) -> Result<Option<String>, CoreError> {
        let prompt = if connection.user.is_empty() {
            "One-time code sent to your email".to_owned()
        } else {
            format!("One-time code sent to {}", connection.user)
        };

        let answer = tokio::task::spawn_blocking(move || {
            Input::<String>::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
        })
        .await
        .map_err(|e| CoreError::Internal(format!("code prompt task failed: {e}")))?;

        let code = answer.map_err(|e| CoreError::Internal(format!("code prompt failed: {e}")))?;
        let code = code.trim();
        Ok((!code.is_empty()).then(|| code.to_owned()))
    }
}
