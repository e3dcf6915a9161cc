// Bot presence. Discord-layer glue only: Context, ActivityData, OnlineStatus.

use poise::serenity_prelude as serenity;

/// Shows how to reach the router in the member list.
pub fn on_ready(ctx: &serenity::Context) {
    let activity = serenity::ActivityData::listening("@mentions and /workspace");
    ctx.set_presence(Some(activity), serenity::OnlineStatus::Online);
}
