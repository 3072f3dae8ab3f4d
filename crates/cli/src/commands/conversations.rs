//! `parley conversations`: List a user's stored conversations.

use anyhow::{Context, anyhow};
use parley_config::AppConfig;
use parley_core::message::{ConversationStatus, UserId};
use parley_core::store::ConversationQuery;

pub async fn run(user: String, status: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let store = parley_store::open_from_config(&config)
        .await
        .context("Failed to open conversation store")?;

    let mut query = ConversationQuery::for_user(UserId::from(user.as_str())).page(0, 100);
    if let Some(status) = status.as_deref() {
        let status = ConversationStatus::parse(status).ok_or_else(|| anyhow!("unknown status `{status}`"))?;
        query = query.with_status(status);
    }

    let conversations = store.list_conversations(query).await?;
    if conversations.is_empty() {
        println!("No conversations for {user}.");
        return Ok(());
    }

    println!("{:<38} {:<9} {:>5} {:>8}  {:<17} TITLE", "ID", "STATUS", "MSGS", "TOKENS", "LAST ACTIVE");
    for c in &conversations {
        let last = c
            .last_message_at
            .unwrap_or(c.created_at)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        println!(
            "{:<38} {:<9} {:>5} {:>8}  {:<17} {}",
            c.id.as_str(),
            c.status.as_str(),
            c.message_count,
            c.total_tokens,
            last,
            c.title
        );
    }
    println!("\n{} conversation(s)", conversations.len());

    Ok(())
}
