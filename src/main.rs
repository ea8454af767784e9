//! Harmony work orchestration core.
//!
//! Turns submitted jobs into chains of workflow steps, materializes work
//! items, hands them to polling workers fairly, and drives each job to a
//! terminal state.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if harmony::cli::is_verbose() {
        "harmony=info"
    } else {
        "harmony=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    harmony::cli::run().await
}
