//! Interactive prompts with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{KilnError, KilnResult};

/// Prompt for confirmation, returns default if non-interactive or auto-yes
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> KilnResult<bool> {
    // Auto-yes mode bypasses prompts
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }

    // Non-interactive mode returns default
    if !ctx.is_interactive() {
        return Ok(default);
    }

    // Run blocking cliclack prompt in spawn_blocking
    let message = message.to_string();
    let result = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| KilnError::User(format!("Prompt task failed: {}", e)))?;

    result.map_err(|e| KilnError::User(format!("Prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_auto_yes() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Test?", false).await.unwrap());
    }

    #[tokio::test]
    async fn confirm_non_interactive_default() {
        let ctx = UiContext::non_interactive();
        assert!(confirm(&ctx, "Test?", true).await.unwrap());
        assert!(!confirm(&ctx, "Test?", false).await.unwrap());
    }
}
