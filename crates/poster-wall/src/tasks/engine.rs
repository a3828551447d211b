pub mod state;
pub mod timers;

use std::future::pending;
use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::WallEvent;
use crate::source::{WallSnapshot, WallSource};
use crate::tasks::prefetch::ImagePrefetcher;
use crate::tasks::transition::{TransitionController, TransitionError};
use state::{EngineCommand, FetchKind, RotationEngine, TransitionOutcome};
use timers::TimerKind;

type FetchResult = (FetchKind, u64, Result<WallSnapshot>);

/// Drives a [`RotationEngine`]: fires its timers, performs its fetches and
/// transitions, and feeds the results back in.
///
/// Rules:
/// - Fetches run concurrently; results are matched by generation inside the engine.
/// - At most one transition runs at a time.
/// - Events are best-effort; a full or closed channel never stalls the wall.
pub async fn run(
    engine: RotationEngine,
    source: Arc<dyn WallSource>,
    transitions: TransitionController,
    prefetcher: ImagePrefetcher,
    events: Sender<WallEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut driver = Driver {
        engine,
        source,
        transitions,
        prefetcher,
        events,
        fetches: JoinSet::new(),
        transition: None,
    };

    let commands = driver.engine.start(Instant::now());
    driver.dispatch(commands);
    info!("rotation engine started");

    loop {
        let due = driver.engine.timers().next_due();
        select! {
            _ = cancel.cancelled() => break,

            kind = wait_for(due) => {
                let commands = driver.engine.on_timer(kind, Instant::now());
                driver.dispatch(commands);
            }

            Some(joined) = driver.fetches.join_next() => {
                match joined {
                    Ok((kind, generation, result)) => {
                        let commands =
                            driver.engine.on_fetched(kind, generation, result, Instant::now());
                        driver.dispatch(commands);
                    }
                    Err(err) => warn!(error = %err, "wall fetch task failed"),
                }
            }

            outcome = wait_transition(&mut driver.transition) => {
                let commands = driver.engine.on_transition_finished(outcome, Instant::now());
                driver.dispatch(commands);
            }
        }
    }

    driver.fetches.abort_all();
    if let Some(handle) = driver.transition.take() {
        handle.abort();
    }
    info!("rotation engine stopped");
    Ok(())
}

struct Driver {
    engine: RotationEngine,
    source: Arc<dyn WallSource>,
    transitions: TransitionController,
    prefetcher: ImagePrefetcher,
    events: Sender<WallEvent>,
    fetches: JoinSet<FetchResult>,
    transition: Option<JoinHandle<Result<(), TransitionError>>>,
}

impl Driver {
    fn dispatch(&mut self, commands: Vec<EngineCommand>) {
        for command in commands {
            match command {
                EngineCommand::Fetch {
                    kind,
                    generation,
                    request,
                } => {
                    let source = self.source.clone();
                    self.fetches.spawn(async move {
                        let result = source.fetch(request).await;
                        (kind, generation, result)
                    });
                }
                EngineCommand::Transition { from, to } => {
                    let transitions = self.transitions.clone();
                    self.transition = Some(tokio::spawn(async move {
                        transitions.run(&from, &to).await
                    }));
                }
                EngineCommand::Show(item) => self.transitions.show(&item),
                EngineCommand::Progress(item) => self.transitions.progress(&item),
                EngineCommand::Prefetch(items) => {
                    self.prefetcher.warm(&items);
                }
                EngineCommand::Notify(event) => {
                    if self.events.try_send(event).is_err() {
                        debug!("wall event dropped");
                    }
                }
            }
        }
    }
}

async fn wait_for(due: Option<(TimerKind, Instant)>) -> TimerKind {
    match due {
        Some((kind, at)) => {
            sleep_until(at).await;
            kind
        }
        None => pending().await,
    }
}

async fn wait_transition(
    handle: &mut Option<JoinHandle<Result<(), TransitionError>>>,
) -> TransitionOutcome {
    let Some(running) = handle.as_mut() else {
        return pending().await;
    };
    let joined = running.await;
    *handle = None;
    let result = joined.unwrap_or_else(|err| Err(TransitionError::Aborted(err.to_string())));
    match result {
        Ok(()) => TransitionOutcome::Completed,
        Err(err) => {
            warn!(error = %err, "transition failed");
            TransitionOutcome::Failed
        }
    }
}
