pub mod error;
pub mod generation;
pub mod handlers;
pub mod history;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod repo;
pub mod routes;
pub mod state;

use std::sync::Arc;

pub fn build_state() -> anyhow::Result<state::AppState> {
    let generator: Arc<dyn generation::TextGenerator> =
        if let Some(real) = generation::AnthropicGenerator::from_env() {
            Arc::new(real)
        } else {
            tracing::warn!("ANTHROPIC_API_KEY not set, using the mock generator");
            Arc::new(generation::MockGenerator)
        };
    let identity: Arc<dyn identity::IdentityProvider> = Arc::new(identity::HeaderIdentity);
    Ok(state::AppState::new(generator, identity))
}
