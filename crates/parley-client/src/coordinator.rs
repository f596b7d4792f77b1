use std::future::Future;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

/// Refresh outcomes are fanned out to every queued waiter, so the error must
/// be cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh token rejected")]
    Unauthenticated,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

struct CoordinatorState {
    next_generation: u64,
    inflight: Option<(u64, SharedRefresh)>,
}

/// Single-flight refresh: across arbitrarily many concurrently failing
/// requests, at most one refresh call is ever in flight. The first caller
/// starts the flight; everyone else awaits the same shared future and
/// resolves with that flight's outcome.
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                next_generation: 0,
                inflight: None,
            }),
        }
    }

    /// Join the in-flight refresh, or start one with `do_refresh`. The
    /// closure runs only when this call starts the flight.
    pub async fn run<F, Fut>(&self, do_refresh: F) -> Result<String, RefreshError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, RefreshError>> + Send + 'static,
    {
        let (generation, flight) = {
            let mut state = self.state.lock().expect("coordinator lock poisoned");
            match &state.inflight {
                Some((generation, flight)) => (*generation, flight.clone()),
                None => {
                    state.next_generation += 1;
                    let generation = state.next_generation;
                    let flight = do_refresh().boxed().shared();
                    state.inflight = Some((generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let result = flight.await;

        // First waiter back clears the slot; a generation check keeps a
        // newer flight from being clobbered by stragglers.
        let mut state = self.state.lock().expect("coordinator lock poisoned");
        if matches!(&state.inflight, Some((current, _)) if *current == generation) {
            state.inflight = None;
        }

        result
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
