use crate::core::ai::InferenceProvider;
use crate::core::integration::{IntegrationService, Response, ResponseKind};
use crate::core::registry::CapabilityRegistry;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Discord's hard limit for a single message.
pub const MESSAGE_LIMIT: usize = 2000;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state every command and event handler can reach.
pub struct Data {
    pub router: Arc<IntegrationService<Box<dyn InferenceProvider>>>,
}

/// One conversation per user per channel.
pub fn session_id(channel_id: serenity::ChannelId, user_id: serenity::UserId) -> String {
    format!("{}:{}", channel_id.get(), user_id.get())
}

/// Removes `<@id>` and `<@!id>` mentions of the bot from a message.
pub fn strip_mention(content: &str, bot_id: serenity::UserId) -> String {
    content
        .replace(&format!("<@{}>", bot_id.get()), "")
        .replace(&format!("<@!{}>", bot_id.get()), "")
        .trim()
        .to_string()
}

/// What the user sees for a router response.
pub fn render_response(response: &Response) -> String {
    match response.kind {
        ResponseKind::Completed => format!("✅ {}", response.message),
        ResponseKind::Clarification => format!("❓ {}", response.message),
        ResponseKind::Failed => format!("⚠️ {}", response.message),
    }
}

/// Splits on character boundaries so every chunk fits in one message.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    text.chars()
        .collect::<Vec<char>>()
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn describe_capabilities(registry: &CapabilityRegistry) -> String {
    let mut out = String::new();
    for capability in registry.capabilities() {
        let operations: Vec<&str> = capability.operations.iter().map(|op| op.name()).collect();
        out.push_str(&format!(
            "**{}** ({}): {}\n",
            capability.name,
            capability.description,
            operations.join(", ")
        ));
    }
    out
}

/// Root `/workspace` command. Subcommands do the work.
#[poise::command(slash_command, subcommands("ask", "forget", "capabilities"))]
pub async fn workspace(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(
        "Workspace commands:\n\
        `/workspace ask <request>` - Ask in plain language, e.g. \"list my next 5 events\"\n\
        `/workspace forget` - Clear what I remember about this conversation\n\
        `/workspace capabilities` - Show what I can operate on\n\
        You can also just mention me with a request.",
    )
    .await?;
    Ok(())
}

/// Run a natural-language request against your workspace.
#[poise::command(slash_command)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "What should I do?"] request: String,
) -> Result<(), Error> {
    ctx.defer().await?;

    let session = session_id(ctx.channel_id(), ctx.author().id);
    let response = ctx
        .data()
        .router
        .process_natural_language_request(&session, &request)
        .await;

    for chunk in chunk_message(&render_response(&response), MESSAGE_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Forget this conversation's history and remembered items.
#[poise::command(slash_command)]
pub async fn forget(ctx: Context<'_>) -> Result<(), Error> {
    let session = session_id(ctx.channel_id(), ctx.author().id);
    ctx.data().router.reset_session(&session).await?;
    ctx.say("Done, I've forgotten our conversation here.").await?;
    Ok(())
}

/// List the capabilities and operations I can route to.
#[poise::command(slash_command)]
pub async fn capabilities(ctx: Context<'_>) -> Result<(), Error> {
    let text = describe_capabilities(ctx.data().router.registry());
    for chunk in chunk_message(&text, MESSAGE_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}
