use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{round_store::RoundStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a round store installed in the shared state, toggling degraded mode while it is unreachable.
///
/// While degraded the scheduler abandons its cycles and the gateway refuses requests.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoundStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new();

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(backoff.next_delay()).await;
                continue;
            }
        };

        state.set_round_store(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        backoff = Backoff::new();

        watch_health(&state, store.as_ref()).await;

        state.clear_round_store().await;
        sleep(backoff.next_delay()).await;
    }
}

/// Poll the store until it stays unreachable through every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn RoundStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store).await {
                    warn!("exhausted storage reconnect attempts; dropping store and reconnecting");
                    return;
                }
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn RoundStore) -> bool {
    let mut backoff = Backoff::new();

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                state.update_degraded(false);
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(backoff.next_delay()).await;
            }
        }
    }

    false
}

/// Exponential delay doubling from [`INITIAL_DELAY`] up to [`MAX_DELAY`].
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_DELAY,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_DELAY);
        delay
    }
}
