use std::collections::VecDeque;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::timers::{TimerKind, Timers};
use crate::config::WallOptions;
use crate::events::{WallEvent, WallMode};
use crate::item::{Item, ItemKey};
use crate::source::{WallRequest, WallSnapshot};
use crate::tasks::sampler::dedupe_by_key;

/// Externally observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    IdleRotating,
    StreamingSingle,
    StreamingMulti,
    /// A poster transition is in flight; display changes are dropped until it settles.
    Transitioning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    IdleRotating,
    StreamingSingle,
    StreamingMulti,
}

impl Phase {
    fn for_streams(count: usize) -> Self {
        match count {
            0 => Self::IdleRotating,
            1 => Self::StreamingSingle,
            _ => Self::StreamingMulti,
        }
    }

    fn mode(self) -> WallMode {
        match self {
            Self::IdleRotating => WallMode::Idle,
            Self::StreamingSingle | Self::StreamingMulti => WallMode::Streaming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Probe,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed,
    Failed,
}

/// Side effects requested by the engine; the driver carries them out.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Fetch {
        kind: FetchKind,
        generation: u64,
        request: WallRequest,
    },
    Transition {
        from: Item,
        to: Item,
    },
    /// Paint without a transition: first display, or either side lacks a poster.
    Show(Item),
    Progress(Item),
    Prefetch(Vec<Item>),
    Notify(WallEvent),
}

/// Bounded FIFO of recently displayed keys.
#[derive(Debug, Default)]
struct RecentlySeen {
    keys: VecDeque<ItemKey>,
}

impl RecentlySeen {
    fn contains(&self, key: &ItemKey) -> bool {
        self.keys.contains(key)
    }

    fn remember(&mut self, key: ItemKey, window: usize) {
        self.keys.retain(|k| k != &key);
        self.keys.push_back(key);
        self.trim(window);
    }

    fn trim(&mut self, window: usize) {
        while self.keys.len() > window {
            self.keys.pop_front();
        }
    }

    fn clear(&mut self) {
        self.keys.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Decides what the wall shows and when.
///
/// Pure: every input carries `now`, every output is an [`EngineCommand`].
pub struct RotationEngine {
    options: WallOptions,
    rng: StdRng,
    phase: Phase,
    batch: Vec<Item>,
    streams: Vec<Item>,
    current_index: usize,
    displayed: Option<Item>,
    in_flight: Option<Item>,
    recent: RecentlySeen,
    timers: Timers,
    displays_in_batch: u32,
    batch_loaded_at: Instant,
    next_up: Option<usize>,
    generation: u64,
    applied_streams: u64,
    pending_batch: Option<u64>,
}

impl RotationEngine {
    pub fn new(options: WallOptions, now: Instant) -> Self {
        let rng = match options.selection_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let timers = Timers::new(
            options.rotation_interval,
            options.probe_interval,
            options.refresh_interval,
        );
        Self {
            options,
            rng,
            phase: Phase::IdleRotating,
            batch: Vec::new(),
            streams: Vec::new(),
            current_index: 0,
            displayed: None,
            in_flight: None,
            recent: RecentlySeen::default(),
            timers,
            displays_in_batch: 0,
            batch_loaded_at: now,
            next_up: None,
            generation: 0,
            applied_streams: 0,
            pending_batch: None,
        }
    }

    /// Arms the timers and asks for the first batch.
    pub fn start(&mut self, now: Instant) -> Vec<EngineCommand> {
        self.timers.probe.schedule(now);
        self.timers.refresh.schedule(now);
        self.timers.rotation.schedule(now);
        self.request_batch(true).into_iter().collect()
    }

    pub fn state(&self) -> EngineState {
        if self.in_flight.is_some() {
            return EngineState::Transitioning;
        }
        match self.phase {
            Phase::IdleRotating => EngineState::IdleRotating,
            Phase::StreamingSingle => EngineState::StreamingSingle,
            Phase::StreamingMulti => EngineState::StreamingMulti,
        }
    }

    pub fn mode(&self) -> WallMode {
        self.phase.mode()
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn displayed(&self) -> Option<&Item> {
        self.displayed.as_ref()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Streams while streaming, the idle batch otherwise.
    pub fn collection(&self) -> &[Item] {
        match self.phase {
            Phase::IdleRotating => &self.batch,
            Phase::StreamingSingle | Phase::StreamingMulti => &self.streams,
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind, now: Instant) -> Vec<EngineCommand> {
        match kind {
            TimerKind::Probe => {
                self.timers.probe.schedule(now);
                vec![self.fetch(FetchKind::Probe)]
            }
            TimerKind::Refresh => {
                self.timers.refresh.schedule(now);
                if self.phase != Phase::IdleRotating {
                    return Vec::new();
                }
                self.request_batch(false).into_iter().collect()
            }
            TimerKind::Rotation => self.on_rotation_tick(now),
        }
    }

    /// Applies a fetch result. Failed probes skip reconciliation entirely.
    pub fn on_fetched(
        &mut self,
        kind: FetchKind,
        generation: u64,
        result: anyhow::Result<WallSnapshot>,
        now: Instant,
    ) -> Vec<EngineCommand> {
        let current_batch = kind == FetchKind::Batch && self.pending_batch == Some(generation);
        let mut commands = Vec::new();
        match result {
            Ok(snapshot) => {
                if generation > self.applied_streams {
                    self.applied_streams = generation;
                    commands.extend(self.reconcile(snapshot.active_streams, current_batch, now));
                } else {
                    debug!(generation, "superseded stream snapshot ignored");
                }
                if kind == FetchKind::Batch {
                    commands.extend(self.on_batch(generation, Some(snapshot.random_items), now));
                }
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), ?kind, "wall fetch failed");
                if kind == FetchKind::Batch {
                    commands.extend(self.on_batch(generation, None, now));
                }
            }
        }
        commands
    }

    pub fn on_transition_finished(
        &mut self,
        outcome: TransitionOutcome,
        _now: Instant,
    ) -> Vec<EngineCommand> {
        let Some(target) = self.in_flight.take() else {
            return Vec::new();
        };
        match outcome {
            TransitionOutcome::Completed => {
                let key = target.key();
                if self.collection().iter().any(|i| i.key() == key) {
                    return self.commit(target);
                }
                // The collection moved on mid-flight; catch up with its first item.
                debug!(item = %target.label(), "transition target superseded");
                self.displayed = Some(target);
                self.current_index = 0;
                self.begin_display(0)
            }
            TransitionOutcome::Failed => {
                warn!(item = %target.label(), "transition aborted; display unchanged");
                Vec::new()
            }
        }
    }

    /// Picks a random index that is neither current nor recently seen.
    ///
    /// The recent window shrinks to `total - 1` so some candidate always remains;
    /// if the window still exhausts the collection it is cleared.
    pub fn select_next_index(&mut self) -> Option<usize> {
        let keys: Vec<ItemKey> = self.collection().iter().map(Item::key).collect();
        let total = keys.len();
        match total {
            0 => return None,
            1 => {
                let on_screen = self.displayed.as_ref().map(Item::key);
                return (on_screen.as_ref() != Some(&keys[0])).then_some(0);
            }
            _ => {}
        }
        let current = self.current_index;
        self.recent.trim((total - 1).min(self.options.recent_window));
        let mut candidates: Vec<usize> = (0..total)
            .filter(|&i| i != current && !self.recent.contains(&keys[i]))
            .collect();
        if candidates.is_empty() {
            debug!(total, "recently-seen window exhausted; clearing");
            self.recent.clear();
            candidates = (0..total).filter(|&i| i != current).collect();
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }

    fn on_rotation_tick(&mut self, now: Instant) -> Vec<EngineCommand> {
        if self.phase == Phase::StreamingSingle {
            self.timers.rotation.cancel();
            return Vec::new();
        }
        self.timers.rotation.schedule(now);
        if self.in_flight.is_some() {
            debug!("rotation tick dropped; transition in flight");
            return Vec::new();
        }

        if self.phase == Phase::StreamingMulti {
            let next = (self.current_index + 1) % self.streams.len().max(1);
            return self.begin_display(next);
        }

        if self.needs_refresh(now) {
            if let Some(fetch) = self.request_batch(false) {
                return vec![fetch];
            }
        }
        let len = self.batch.len();
        let current = self.current_index;
        let next = self
            .next_up
            .take()
            .filter(|&i| i < len && i != current)
            .or_else(|| self.select_next_index());
        match next {
            Some(next) => self.begin_display(next),
            None => Vec::new(),
        }
    }

    fn needs_refresh(&self, now: Instant) -> bool {
        if self.batch.is_empty() || self.batch.iter().any(Item::is_placeholder) {
            return true;
        }
        self.displays_in_batch >= self.options.refresh_after_displays
            || now.duration_since(self.batch_loaded_at) >= self.options.refresh_interval
            || self.displays_in_batch as usize + 1 >= self.batch.len()
    }

    fn fetch(&mut self, kind: FetchKind) -> EngineCommand {
        self.generation += 1;
        let request = match kind {
            FetchKind::Probe => WallRequest::probe(),
            FetchKind::Batch => WallRequest::batch(self.options.batch_size, None),
        };
        EngineCommand::Fetch {
            kind,
            generation: self.generation,
            request,
        }
    }

    /// A forced request supersedes any pending one; otherwise one request at a time.
    fn request_batch(&mut self, force: bool) -> Option<EngineCommand> {
        if self.pending_batch.is_some() && !force {
            debug!("batch request already pending");
            return None;
        }
        let fetch = self.fetch(FetchKind::Batch);
        self.pending_batch = Some(self.generation);
        Some(fetch)
    }

    fn reconcile(
        &mut self,
        streams: Vec<Item>,
        batch_in_hand: bool,
        now: Instant,
    ) -> Vec<EngineCommand> {
        let was_streaming = self.phase.mode() == WallMode::Streaming;
        let mut commands = Vec::new();
        match (was_streaming, streams.is_empty()) {
            (false, true) => {}
            (false, false) => {
                self.streams = streams;
                self.enter(Phase::for_streams(self.streams.len()), now, &mut commands);
                self.current_index = 0;
                self.next_up = None;
                commands.extend(self.begin_display(0));
            }
            (true, true) => {
                self.streams.clear();
                self.enter(Phase::IdleRotating, now, &mut commands);
                self.current_index = 0;
                self.next_up = None;
                self.timers.refresh.schedule(now);
                if !batch_in_hand {
                    commands.extend(self.request_batch(true));
                }
            }
            (true, false) => {
                self.streams = streams;
                let phase = Phase::for_streams(self.streams.len());
                if phase != self.phase {
                    self.enter(phase, now, &mut commands);
                }
                let on_screen = self.displayed.as_ref().map(Item::key);
                let position = on_screen
                    .as_ref()
                    .and_then(|key| self.streams.iter().position(|s| &s.key() == key));
                match position {
                    Some(index) => {
                        self.current_index = index;
                        let fresh = self.streams[index].clone();
                        if self.displayed.as_ref() != Some(&fresh) {
                            self.displayed = Some(fresh.clone());
                            commands.push(EngineCommand::Progress(fresh.clone()));
                            commands.push(EngineCommand::Notify(WallEvent::Progress(fresh)));
                        }
                    }
                    None => {
                        self.current_index = 0;
                        commands.extend(self.begin_display(0));
                    }
                }
            }
        }
        commands
    }

    /// Switches phase, keeping the rotation timer consistent with it.
    fn enter(&mut self, phase: Phase, now: Instant, commands: &mut Vec<EngineCommand>) {
        let from = self.phase;
        self.phase = phase;
        match phase {
            Phase::StreamingSingle => self.timers.rotation.cancel(),
            Phase::IdleRotating | Phase::StreamingMulti => self.timers.rotation.schedule(now),
        }
        info!(from = ?from, to = ?phase, streams = self.streams.len(), "wall phase changed");
        if from.mode() != phase.mode() {
            commands.push(EngineCommand::Notify(WallEvent::ModeChanged {
                from: from.mode(),
                to: phase.mode(),
                streams: self.streams.len(),
            }));
        }
    }

    fn on_batch(
        &mut self,
        generation: u64,
        items: Option<Vec<Item>>,
        now: Instant,
    ) -> Vec<EngineCommand> {
        if self.pending_batch != Some(generation) {
            debug!(generation, "stale batch dropped");
            return Vec::new();
        }
        self.pending_batch = None;
        let Some(items) = items else {
            return self.fallback_display();
        };
        let items = dedupe_by_key(items);
        if items.is_empty() {
            warn!("batch came back empty");
            return self.fallback_display();
        }
        if self.phase != Phase::IdleRotating {
            debug!(items = items.len(), "batch arrived while streaming; kept for later");
            self.batch = items;
            self.displays_in_batch = 0;
            self.batch_loaded_at = now;
            return Vec::new();
        }

        info!(items = items.len(), "idle batch loaded");
        self.batch = items;
        self.current_index = 0;
        self.displays_in_batch = 0;
        self.batch_loaded_at = now;
        self.next_up = None;
        let warm: Vec<Item> = self
            .batch
            .iter()
            .take(self.options.prefetch_count)
            .cloned()
            .collect();
        let mut commands = vec![
            EngineCommand::Notify(WallEvent::BatchLoaded {
                items: self.batch.len(),
            }),
            EngineCommand::Prefetch(warm),
        ];
        commands.extend(self.begin_display(0));
        commands
    }

    /// Keeps something on screen when a batch could not be had.
    fn fallback_display(&mut self) -> Vec<EngineCommand> {
        if self.phase != Phase::IdleRotating {
            return Vec::new();
        }
        let on_screen = self.displayed.as_ref().map(Item::key);
        let showing_batch = on_screen
            .as_ref()
            .is_some_and(|key| self.batch.iter().any(|i| &i.key() == key));
        if showing_batch {
            return Vec::new();
        }
        if self.batch.is_empty() {
            warn!("no streams and no idle content; showing placeholder");
            self.batch = vec![Item::placeholder()];
        }
        self.current_index = 0;
        self.begin_display(0)
    }

    fn begin_display(&mut self, target: usize) -> Vec<EngineCommand> {
        if self.in_flight.is_some() {
            debug!(target, "display change dropped; transition in flight");
            return Vec::new();
        }
        let Some(to) = self.collection().get(target).cloned() else {
            return Vec::new();
        };
        match self.displayed.clone() {
            Some(from) if from.key() == to.key() => {
                self.current_index = target;
                Vec::new()
            }
            Some(from) if flippable(&from) && flippable(&to) => {
                debug!(from = %from.label(), to = %to.label(), "transition started");
                self.in_flight = Some(to.clone());
                vec![EngineCommand::Transition { from, to }]
            }
            _ => {
                let mut commands = vec![EngineCommand::Show(to.clone())];
                commands.extend(self.commit(to));
                commands
            }
        }
    }

    /// Makes `item` the committed display, re-validated against the collection as it is now.
    fn commit(&mut self, item: Item) -> Vec<EngineCommand> {
        let key = item.key();
        let position = self.collection().iter().position(|i| i.key() == key);
        match position {
            Some(index) => self.current_index = index,
            None => self.clamp_index(),
        }
        if self.phase == Phase::IdleRotating {
            let window = self
                .batch
                .len()
                .saturating_sub(1)
                .min(self.options.recent_window);
            self.recent.remember(key, window);
            self.displays_in_batch += 1;
        }
        info!(item = %item.label(), index = self.current_index, "displayed");
        self.displayed = Some(item.clone());

        let mut commands = vec![EngineCommand::Notify(WallEvent::Displayed {
            item,
            mode: self.phase.mode(),
        })];
        commands.extend(self.plan_prefetch());
        commands
    }

    /// Pre-selects the next idle item and warms the upcoming posters.
    fn plan_prefetch(&mut self) -> Option<EngineCommand> {
        let len = self.collection().len();
        if len < 2 {
            return None;
        }
        let start = match self.phase {
            Phase::IdleRotating => {
                let next = self.select_next_index()?;
                self.next_up = Some(next);
                next
            }
            Phase::StreamingSingle | Phase::StreamingMulti => (self.current_index + 1) % len,
        };
        let upcoming: Vec<Item> = (0..len)
            .map(|offset| (start + offset) % len)
            .filter(|&i| i != self.current_index)
            .take(self.options.prefetch_count)
            .map(|i| self.collection()[i].clone())
            .collect();
        Some(EngineCommand::Prefetch(upcoming))
    }

    fn clamp_index(&mut self) {
        let len = self.collection().len();
        self.current_index = if len == 0 {
            0
        } else {
            self.current_index.min(len - 1)
        };
    }

    #[cfg(test)]
    fn recent_len(&self) -> usize {
        self.recent.len()
    }
}

/// Tiles need a real poster on both faces; anything else is painted directly.
fn flippable(item: &Item) -> bool {
    !item.is_placeholder() && item.poster_ref().is_some()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::item::ItemKind;

    fn item(key: &str) -> Item {
        Item {
            title: format!("Title {key}"),
            kind: ItemKind::Movie,
            rating_key: key.to_string(),
            thumb_ref: format!("thumb-{key}"),
            ..Item::default()
        }
    }

    fn bare(key: &str) -> Item {
        Item {
            title: format!("Title {key}"),
            kind: ItemKind::Movie,
            rating_key: key.to_string(),
            ..Item::default()
        }
    }

    fn transition_target(commands: &[EngineCommand]) -> Option<String> {
        commands.iter().find_map(|c| match c {
            EngineCommand::Transition { to, .. } => Some(to.rating_key.clone()),
            _ => None,
        })
    }

    fn items(prefix: &str, n: usize) -> Vec<Item> {
        (0..n).map(|i| item(&format!("{prefix}{i}"))).collect()
    }

    fn options() -> WallOptions {
        WallOptions {
            selection_seed: Some(7),
            ..WallOptions::default()
        }
    }

    fn snapshot(streams: Vec<Item>, random: Vec<Item>) -> WallSnapshot {
        WallSnapshot {
            active_streams: streams,
            random_items: random,
            timestamp: 0,
        }
    }

    fn fetch_of(commands: &[EngineCommand], wanted: FetchKind) -> Option<u64> {
        commands.iter().find_map(|c| match c {
            EngineCommand::Fetch {
                kind, generation, ..
            } if *kind == wanted => Some(*generation),
            _ => None,
        })
    }

    fn has_transition(commands: &[EngineCommand]) -> bool {
        commands
            .iter()
            .any(|c| matches!(c, EngineCommand::Transition { .. }))
    }

    /// Started engine whose first batch has been delivered and shown.
    fn idle_engine(batch: Vec<Item>, t0: Instant) -> RotationEngine {
        let mut engine = RotationEngine::new(options(), t0);
        let start = engine.start(t0);
        let generation = fetch_of(&start, FetchKind::Batch).unwrap();
        let commands =
            engine.on_fetched(FetchKind::Batch, generation, Ok(snapshot(vec![], batch)), t0);
        assert!(commands.iter().any(|c| matches!(c, EngineCommand::Show(_))));
        engine
    }

    fn probe(engine: &mut RotationEngine, streams: Vec<Item>, now: Instant) -> Vec<EngineCommand> {
        let fetch = engine.on_timer(TimerKind::Probe, now);
        let generation = fetch_of(&fetch, FetchKind::Probe).unwrap();
        engine.on_fetched(FetchKind::Probe, generation, Ok(snapshot(streams, vec![])), now)
    }

    #[test]
    fn first_batch_is_shown_directly() {
        let t0 = Instant::now();
        let engine = idle_engine(items("b", 10), t0);
        assert_eq!(engine.state(), EngineState::IdleRotating);
        assert_eq!(engine.displayed().map(|i| i.rating_key.as_str()), Some("b0"));
        assert_eq!(engine.current_index(), 0);
    }

    #[test]
    fn selection_never_returns_current() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 3), t0);
        for _ in 0..200 {
            let next = engine.select_next_index().unwrap();
            assert_ne!(next, engine.current_index());
        }
    }

    #[test]
    fn single_item_that_is_on_screen_yields_nothing() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("solo", 1), t0);
        assert_eq!(engine.select_next_index(), None);
    }

    #[test]
    fn no_repeats_within_recent_window() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 8), t0);
        let mut now = t0;
        let mut shown = vec![engine.displayed().unwrap().key()];
        for _ in 0..5 {
            now += Duration::from_secs(8);
            let commands = engine.on_timer(TimerKind::Rotation, now);
            assert!(has_transition(&commands));
            engine.on_transition_finished(TransitionOutcome::Completed, now);
            shown.push(engine.displayed().unwrap().key());
        }
        for pair in shown.windows(6) {
            let unique: HashSet<_> = pair.iter().collect();
            assert_eq!(unique.len(), pair.len(), "repeat inside window: {pair:?}");
        }
        assert!(engine.recent_len() <= 5);
    }

    #[test]
    fn rotation_tick_is_dropped_while_transitioning() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 10), t0);
        let t1 = t0 + Duration::from_secs(8);
        assert!(has_transition(&engine.on_timer(TimerKind::Rotation, t1)));
        assert_eq!(engine.state(), EngineState::Transitioning);

        let t2 = t1 + Duration::from_secs(8);
        assert!(engine.on_timer(TimerKind::Rotation, t2).is_empty());
        assert!(engine.timers().rotation.is_armed());

        engine.on_transition_finished(TransitionOutcome::Completed, t2);
        assert_eq!(engine.state(), EngineState::IdleRotating);
    }

    #[test]
    fn failed_transition_leaves_display_unchanged() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 10), t0);
        let before = engine.displayed().cloned();
        engine.on_timer(TimerKind::Rotation, t0 + Duration::from_secs(8));
        engine.on_transition_finished(TransitionOutcome::Failed, t0 + Duration::from_secs(9));
        assert_eq!(engine.displayed().cloned(), before);
        assert_eq!(engine.current_index(), 0);
        assert_eq!(engine.state(), EngineState::IdleRotating);
    }

    #[test]
    fn single_stream_stops_rotation_and_second_stream_restarts_it() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 10), t0);
        let t1 = t0 + Duration::from_secs(10);

        let commands = probe(&mut engine, vec![item("s1")], t1);
        assert!(has_transition(&commands));
        assert!(commands.iter().any(|c| matches!(
            c,
            EngineCommand::Notify(WallEvent::ModeChanged {
                to: WallMode::Streaming,
                ..
            })
        )));
        engine.on_transition_finished(TransitionOutcome::Completed, t1);
        assert_eq!(engine.state(), EngineState::StreamingSingle);
        assert!(!engine.timers().rotation.is_armed());

        let t2 = t1 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1"), item("s2")], t2);
        assert_eq!(engine.state(), EngineState::StreamingMulti);
        assert_eq!(
            engine.timers().rotation.deadline(),
            Some(t2 + Duration::from_secs(8))
        );
        assert_eq!(engine.current_index(), 0, "still showing s1");
    }

    #[test]
    fn progress_update_remaps_without_transition() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 4), t0);
        let t1 = t0 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1"), item("s2")], t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);

        let t2 = t1 + Duration::from_secs(8);
        assert!(has_transition(&engine.on_timer(TimerKind::Rotation, t2)));
        engine.on_transition_finished(TransitionOutcome::Completed, t2);
        assert_eq!(engine.displayed().unwrap().rating_key, "s2");

        let mut progressed = item("s2");
        progressed.view_offset_ms = 60_000;
        progressed.duration_ms = 120_000;
        let t3 = t2 + Duration::from_secs(10);
        let streams = vec![item("s0"), progressed.clone(), item("s1")];
        let commands = probe(&mut engine, streams, t3);
        assert!(!has_transition(&commands));
        assert!(commands.contains(&EngineCommand::Progress(progressed.clone())));
        assert_eq!(engine.current_index(), 1);
        assert_eq!(engine.displayed(), Some(&progressed));
    }

    #[test]
    fn vanished_stream_restarts_from_first() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 4), t0);
        let t1 = t0 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1")], t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);

        let t2 = t1 + Duration::from_secs(10);
        let commands = probe(&mut engine, vec![item("s9")], t2);
        assert_eq!(
            commands.iter().find_map(|c| match c {
                EngineCommand::Transition { to, .. } => Some(to.rating_key.clone()),
                _ => None,
            }),
            Some("s9".to_string())
        );
        assert_eq!(engine.current_index(), 0);
    }

    #[test]
    fn streams_ending_requests_a_fresh_batch() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 6), t0);
        let t1 = t0 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1")], t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);

        let t2 = t1 + Duration::from_secs(10);
        let commands = probe(&mut engine, vec![], t2);
        assert_eq!(engine.state(), EngineState::IdleRotating);
        assert!(fetch_of(&commands, FetchKind::Batch).is_some());
        assert!(engine.timers().rotation.is_armed());
        assert!(engine.current_index() < engine.collection().len());
    }

    #[test]
    fn stale_batch_is_dropped() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 6), t0);
        let t1 = t0 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1")], t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);

        let refresh = engine.on_timer(TimerKind::Refresh, t1);
        assert!(refresh.is_empty(), "no refresh while streaming");

        let t2 = t1 + Duration::from_secs(10);
        let ended = probe(&mut engine, vec![], t2);
        let first = fetch_of(&ended, FetchKind::Batch).unwrap();
        let t3 = t2 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s2")], t3);
        let t4 = t3 + Duration::from_secs(10);
        let ended_again = probe(&mut engine, vec![], t4);
        let second = fetch_of(&ended_again, FetchKind::Batch).unwrap();
        assert!(second > first);

        let old = engine.on_fetched(
            FetchKind::Batch,
            first,
            Ok(snapshot(vec![], items("old", 5))),
            t4,
        );
        assert!(old.is_empty());
        engine.on_fetched(
            FetchKind::Batch,
            second,
            Ok(snapshot(vec![], items("new", 5))),
            t4,
        );
        assert!(engine.collection().iter().all(|i| i.rating_key.starts_with("new")));
    }

    #[test]
    fn empty_first_batch_shows_placeholder() {
        let t0 = Instant::now();
        let mut engine = RotationEngine::new(options(), t0);
        let start = engine.start(t0);
        let generation = fetch_of(&start, FetchKind::Batch).unwrap();
        let commands =
            engine.on_fetched(FetchKind::Batch, generation, Ok(snapshot(vec![], vec![])), t0);
        assert!(commands.contains(&EngineCommand::Show(Item::placeholder())));
        assert!(engine.displayed().unwrap().is_placeholder());

        let t1 = t0 + Duration::from_secs(8);
        let retry = engine.on_timer(TimerKind::Rotation, t1);
        assert!(fetch_of(&retry, FetchKind::Batch).is_some());
    }

    #[test]
    fn failed_probe_skips_reconciliation() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 6), t0);
        let fetch = engine.on_timer(TimerKind::Probe, t0 + Duration::from_secs(10));
        let generation = fetch_of(&fetch, FetchKind::Probe).unwrap();
        let commands = engine.on_fetched(
            FetchKind::Probe,
            generation,
            Err(anyhow::anyhow!("endpoint down")),
            t0,
        );
        assert!(commands.is_empty());
        assert_eq!(engine.state(), EngineState::IdleRotating);
    }

    #[test]
    fn exhausting_the_batch_requests_a_refresh() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 3), t0);
        let mut now = t0;
        let mut fetched = None;
        for _ in 0..3 {
            now += Duration::from_secs(8);
            let commands = engine.on_timer(TimerKind::Rotation, now);
            if let Some(generation) = fetch_of(&commands, FetchKind::Batch) {
                fetched = Some(generation);
                break;
            }
            engine.on_transition_finished(TransitionOutcome::Completed, now);
        }
        assert!(fetched.is_some());
    }

    #[test]
    fn display_prefetches_upcoming_items() {
        let t0 = Instant::now();
        let mut engine = RotationEngine::new(options(), t0);
        let start = engine.start(t0);
        let generation = fetch_of(&start, FetchKind::Batch).unwrap();
        let commands = engine.on_fetched(
            FetchKind::Batch,
            generation,
            Ok(snapshot(vec![], items("b", 10))),
            t0,
        );
        let warmed: Vec<&Vec<Item>> = commands
            .iter()
            .filter_map(|c| match c {
                EngineCommand::Prefetch(items) => Some(items),
                _ => None,
            })
            .collect();
        assert_eq!(warmed.len(), 2);
        let after_display = warmed[1];
        assert_eq!(after_display.len(), 3);
        assert!(after_display.iter().all(|i| i.rating_key != "b0"));
    }

    #[test]
    fn posterless_stream_hands_over_to_the_idle_batch() {
        let t0 = Instant::now();
        let mut engine = RotationEngine::new(options(), t0);
        let start = engine.start(t0);
        let generation = fetch_of(&start, FetchKind::Batch).unwrap();
        let commands = engine.on_fetched(
            FetchKind::Batch,
            generation,
            Ok(snapshot(vec![bare("foo")], items("b", 10))),
            t0,
        );
        assert!(commands.contains(&EngineCommand::Show(bare("foo"))));
        assert_eq!(engine.state(), EngineState::StreamingSingle);

        let t1 = t0 + Duration::from_secs(15);
        let ended = probe(&mut engine, vec![], t1);
        let refill = fetch_of(&ended, FetchKind::Batch).unwrap();
        let commands = engine.on_fetched(
            FetchKind::Batch,
            refill,
            Ok(snapshot(vec![], items("n", 10))),
            t1,
        );
        assert!(!has_transition(&commands));
        assert!(commands.contains(&EngineCommand::Show(item("n0"))));
        assert_eq!(engine.displayed().map(|i| i.rating_key.as_str()), Some("n0"));

        let t2 = t1 + Duration::from_secs(8);
        assert!(has_transition(&engine.on_timer(TimerKind::Rotation, t2)));
        engine.on_transition_finished(TransitionOutcome::Completed, t2);
        assert_ne!(engine.displayed().map(|i| i.rating_key.as_str()), Some("n0"));
    }

    #[test]
    fn posterless_batch_items_are_shown_directly() {
        let t0 = Instant::now();
        let batch: Vec<Item> = (0..4).map(|i| bare(&format!("p{i}"))).collect();
        let mut engine = idle_engine(batch, t0);
        let mut now = t0;
        let mut shown = vec![engine.displayed().unwrap().key()];
        for _ in 0..2 {
            now += Duration::from_secs(8);
            let commands = engine.on_timer(TimerKind::Rotation, now);
            assert!(!has_transition(&commands));
            assert!(commands.iter().any(|c| matches!(c, EngineCommand::Show(_))));
            assert_eq!(engine.state(), EngineState::IdleRotating);
            shown.push(engine.displayed().unwrap().key());
        }
        assert!(shown.windows(2).all(|pair| pair[0] != pair[1]), "{shown:?}");
    }

    #[test]
    fn posterless_stream_does_not_block_multi_rotation() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 4), t0);
        let t1 = t0 + Duration::from_secs(10);
        let streams = vec![item("s0"), bare("x"), item("s2")];
        probe(&mut engine, streams, t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);
        assert_eq!(engine.state(), EngineState::StreamingMulti);

        let mut now = t1;
        let mut shown = Vec::new();
        for _ in 0..3 {
            now += Duration::from_secs(8);
            let commands = engine.on_timer(TimerKind::Rotation, now);
            if has_transition(&commands) {
                engine.on_transition_finished(TransitionOutcome::Completed, now);
            }
            shown.push(engine.displayed().unwrap().rating_key.clone());
        }
        assert_eq!(shown, vec!["x", "s2", "s0"]);
    }

    #[test]
    fn streams_arriving_mid_transition_take_over_when_it_lands() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 10), t0);
        let t1 = t0 + Duration::from_secs(8);
        assert!(has_transition(&engine.on_timer(TimerKind::Rotation, t1)));

        let commands = probe(&mut engine, vec![item("s1")], t1);
        assert!(!has_transition(&commands), "display change waits for the flip");
        assert_eq!(engine.state(), EngineState::Transitioning);

        let landed = engine.on_transition_finished(TransitionOutcome::Completed, t1);
        assert_eq!(transition_target(&landed), Some("s1".to_string()));
        assert!(engine.displayed().unwrap().rating_key.starts_with('b'));

        engine.on_transition_finished(TransitionOutcome::Completed, t1);
        assert_eq!(engine.state(), EngineState::StreamingSingle);
        assert_eq!(engine.displayed().map(|i| i.rating_key.as_str()), Some("s1"));
    }

    #[test]
    fn failed_refill_after_streams_end_falls_back_to_previous_batch() {
        let t0 = Instant::now();
        let mut engine = idle_engine(items("b", 6), t0);
        let t1 = t0 + Duration::from_secs(10);
        probe(&mut engine, vec![item("s1")], t1);
        engine.on_transition_finished(TransitionOutcome::Completed, t1);

        let t2 = t1 + Duration::from_secs(10);
        let ended = probe(&mut engine, vec![], t2);
        let refill = fetch_of(&ended, FetchKind::Batch).unwrap();
        let commands = engine.on_fetched(
            FetchKind::Batch,
            refill,
            Err(anyhow::anyhow!("endpoint down")),
            t2,
        );
        assert_eq!(transition_target(&commands), Some("b0".to_string()));
        engine.on_transition_finished(TransitionOutcome::Completed, t2);
        assert_eq!(engine.state(), EngineState::IdleRotating);
        assert_eq!(engine.displayed().map(|i| i.rating_key.as_str()), Some("b0"));
    }
}
