// This is the entry point of the workspace router bot.
//
// **Architecture Overview:**
// - `core/` = Routing logic (platform-agnostic)
// - `infra/` = Implementations of core traits (inference APIs, Google APIs, SQLite)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::ai::InferenceProvider;
use crate::core::config::RouterConfig;
use crate::core::context::ContextStore;
use crate::core::integration::IntegrationService;
use crate::core::registry::workspace_catalog;
use crate::discord::commands::presence;
use crate::discord::commands::workspace::{
    chunk_message, render_response, session_id, strip_mention, MESSAGE_LIMIT,
};
use crate::discord::{Data, Error};
use crate::infra::ai::{GeminiClient, OpenRouterClient};
use crate::infra::context::SqliteTurnArchive;
use crate::infra::google::{
    workspace_clients, AccessTokenSource, ServiceAccountAuth, StaticAccessToken,
};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// Mentioning the bot routes the rest of the message as a request.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages (including our own)
        if new_message.author.bot {
            return Ok(());
        }

        let bot_id = ctx.cache.current_user().id;
        if !new_message.mentions.iter().any(|u| u.id == bot_id) {
            return Ok(());
        }

        let _ = new_message.channel_id.broadcast_typing(&ctx.http).await;

        let request = strip_mention(&new_message.content, bot_id);
        let session = session_id(new_message.channel_id, new_message.author.id);
        let response = data
            .router
            .process_natural_language_request(&session, &request)
            .await;

        // Split answer if too long (Discord limit 2000)
        for chunk in chunk_message(&render_response(&response), MESSAGE_LIMIT) {
            if let Err(e) = new_message.channel_id.say(&ctx.http, chunk).await {
                tracing::error!("Failed to send router response: {}", e);
            }
        }
    }

    Ok(())
}

/// OpenRouter (or any OpenAI-compatible endpoint) when its key is set,
/// Gemini otherwise.
fn inference_provider(config: &RouterConfig) -> anyhow::Result<Box<dyn InferenceProvider>> {
    if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
        let mut client = OpenRouterClient::new(key, &config.inference_model);
        if let Ok(base_url) = std::env::var("OPENROUTER_BASE_URL") {
            tracing::info!(base_url = %base_url, "Using custom OpenAI-compatible endpoint");
            client = client.with_base_url(base_url);
        }
        return Ok(Box::new(client));
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        return Ok(Box::new(GeminiClient::new(key, &config.inference_model)));
    }
    anyhow::bail!("Set OPENROUTER_API_KEY or GEMINI_API_KEY")
}

/// A raw `GOOGLE_ACCESS_TOKEN` wins; otherwise the service account.
async fn google_credentials() -> anyhow::Result<Arc<dyn AccessTokenSource>> {
    if let Ok(token) = std::env::var("GOOGLE_ACCESS_TOKEN") {
        tracing::warn!("Using a static Google access token; it will not be refreshed");
        return Ok(Arc::new(StaticAccessToken::new(token)));
    }
    let auth = ServiceAccountAuth::from_env()
        .await
        .map_err(|e| anyhow::anyhow!("Google credentials: {}", e))?;
    tracing::info!(account = %auth.client_email(), "Using Google service account");
    Ok(Arc::new(auth))
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    let config = RouterConfig::from_env();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let provider = inference_provider(&config).expect("No inference provider configured");
    let credentials = google_credentials()
        .await
        .expect("No Google credentials configured");

    let registry = Arc::new(workspace_catalog().expect("Workspace catalog is invalid"));
    let clients = workspace_clients(credentials);

    let mut context = ContextStore::new(config.max_turns, config.session_ttl);
    if let Some(db_path) = &config.session_db {
        let archive = SqliteTurnArchive::new(db_path)
            .await
            .expect("Failed to initialize session database");
        tracing::info!(path = %db_path, "Persisting sessions to SQLite");
        context = context.with_archive(Arc::new(archive));
    }

    let router = Arc::new(IntegrationService::from_config(
        provider,
        registry,
        clients,
        Arc::new(context),
        &config,
    ));

    // Create the data structure that will be shared across all commands
    let data = Data { router };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::commands::workspace::workspace()],
            // Event handler for mentions
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("Commands registered, bot is ready");
                presence::on_ready(ctx);

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
