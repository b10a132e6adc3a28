mod dialogue;
mod session;
mod spatial;
mod telemetry;

use anyhow::Result;
use session::SessionManager;
use telemetry::init_tracing;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let manager = SessionManager::new();
    manager.run().await?;

    let (session, mut updates) = manager.start_encounter_session().await;
    let drain = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            debug!(target: "session_manager", ?update, "conversation update");
        }
    });

    tokio::signal::ctrl_c().await?;
    session.stop().await;
    drain.abort();

    Ok(())
}
