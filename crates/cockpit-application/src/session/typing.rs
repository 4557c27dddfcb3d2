//! TypingCoordinator - debounced "user is typing" signals.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives typing state changes. Must not block.
pub type TypingSink = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct TypingState {
    typing: bool,
    /// Bumped on every keystroke so a superseded timer can tell it lost.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

/// Emits `true` on the first keystroke after idle and `false` once the idle
/// delay passes without input. Only changes are emitted.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct TypingCoordinator {
    idle: Duration,
    sink: TypingSink,
    state: Arc<Mutex<TypingState>>,
}

impl TypingCoordinator {
    pub fn new(idle: Duration, sink: TypingSink) -> Self {
        Self {
            idle,
            sink,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.lock().typing
    }

    /// Reports a keystroke (`true`) or an explicit stop (`false`, e.g. on send).
    pub fn notify_typing(&self, is_typing: bool) {
        let emit = {
            let mut state = self.lock();
            state.epoch = state.epoch.wrapping_add(1);
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }

            let changed = state.typing != is_typing;
            state.typing = is_typing;

            if is_typing {
                state.timer = Some(self.spawn_idle_timer(state.epoch));
            }
            changed
        };

        if emit {
            (self.sink)(is_typing);
        }
    }

    fn spawn_idle_timer(&self, epoch: u64) -> JoinHandle<()> {
        let idle = self.idle;
        let sink = self.sink.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let expired = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.epoch == epoch && state.typing {
                    state.typing = false;
                    state.timer = None;
                    true
                } else {
                    false
                }
            };
            if expired {
                sink(false);
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TypingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TypingState {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
