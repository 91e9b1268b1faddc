/*
 *  coordinator.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Single event loop owning the registry, the scheduler and every widget
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::artwork::{DataUri, ImageFetchPipeline};
use crate::error::{BridgeError, DeckClosed, ImageFetchError};
use crate::registry::{Registration, WidgetRegistry};
use crate::scheduler::GlobalUpdateScheduler;
use crate::states::StateSnapshot;
use crate::traits::{Bridge, ImageTransport};
use crate::widget::{FetchTicket, FollowUp, ImageKey, InputEvent, WidgetId, WidgetKind, WidgetSettings};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PLACEHOLDER: &str = "unavailable";
const EVENT_QUEUE: usize = 64;
/// How long outstanding requests may keep running once the host has gone.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Opaque secret; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Credentials(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Process-wide settings, last writer wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub refresh_interval: Duration,
    pub credentials: Option<Credentials>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings { refresh_interval: DEFAULT_REFRESH_INTERVAL, credentials: None }
    }
}

/// Everything the host can tell the coordinator.
#[derive(Debug, Clone)]
pub enum DeckEvent {
    WidgetAppeared { id: WidgetId, kind: WidgetKind, settings: WidgetSettings },
    WidgetDisappeared { id: WidgetId },
    WidgetSettingsChanged { id: WidgetId, settings: WidgetSettings },
    GlobalSettingsChanged(GlobalSettings),
    Input { id: WidgetId, event: InputEvent },
}

/// What the host should draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PresentationUpdate {
    SetImageKey { context: WidgetId, key: ImageKey },
    #[serde(rename_all = "camelCase")]
    SetImage { context: WidgetId, data_uri: DataUri },
}

impl PresentationUpdate {
    pub fn context(&self) -> &WidgetId {
        match self {
            PresentationUpdate::SetImageKey { context, .. } | PresentationUpdate::SetImage { context, .. } => context,
        }
    }
}

/// Counters published after every step of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckStatus {
    pub registered: usize,
    pub scheduler_running: bool,
    pub scheduler_run_id: Option<u64>,
    pub scheduler_starts: u64,
    /// Ticks that issued a snapshot read
    pub ticks: u64,
    /// Ticks dropped because the previous snapshot read was still out
    pub skipped_ticks: u64,
    pub snapshot_in_flight: bool,
    /// Image results dropped as stale or for unregistered widgets
    pub discarded_results: u64,
    pub dispatch_failures: u64,
    pub image_failures: u64,
}

/// Result of a spawned request, delivered back to the loop.
#[derive(Debug)]
enum Completion {
    Snapshot(Result<StateSnapshot, BridgeError>),
    ButtonRefresh { id: WidgetId, result: Result<StateSnapshot, BridgeError> },
    Dispatched { id: WidgetId, action: String, follow_up: FollowUp, result: Result<String, BridgeError> },
    Image { id: WidgetId, ticket: FetchTicket, result: Result<DataUri, ImageFetchError> },
}

enum Step {
    Event(DeckEvent),
    Completion(Completion),
    Tick(u64),
    HostGone,
}

/// Host side of the coordinator.
#[derive(Debug, Clone)]
pub struct DeckHandle {
    events: mpsc::Sender<DeckEvent>,
    status: watch::Receiver<DeckStatus>,
}

impl DeckHandle {
    pub async fn send(&self, event: DeckEvent) -> Result<(), DeckClosed> {
        self.events.send(event).await.map_err(|_| DeckClosed)
    }

    pub fn status(&self) -> DeckStatus {
        self.status.borrow().clone()
    }
}

pub struct Coordinator<B, T> {
    bridge: Arc<B>,
    pipeline: Arc<ImageFetchPipeline<T>>,
    settings: GlobalSettings,
    placeholder: ImageKey,

    registry: WidgetRegistry,
    scheduler: GlobalUpdateScheduler,
    latest: Option<Arc<StateSnapshot>>,
    snapshot_in_flight: bool,
    outstanding: usize,
    stats: DeckStatus,

    events: mpsc::Receiver<DeckEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    updates: mpsc::UnboundedSender<PresentationUpdate>,
    status: watch::Sender<DeckStatus>,
}

impl<B: Bridge, T: ImageTransport> Coordinator<B, T> {
    /// Start the loop on the current runtime. It runs until every
    /// [`DeckHandle`] clone has been dropped.
    pub fn spawn(
        bridge: B,
        pipeline: ImageFetchPipeline<T>,
        settings: GlobalSettings,
        placeholder: ImageKey,
    ) -> (DeckHandle, mpsc::UnboundedReceiver<PresentationUpdate>, JoinHandle<()>) {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(DeckStatus::default());

        let coordinator = Coordinator {
            bridge: Arc::new(bridge),
            pipeline: Arc::new(pipeline),
            settings,
            placeholder,
            registry: WidgetRegistry::new(),
            scheduler: GlobalUpdateScheduler::new(),
            latest: None,
            snapshot_in_flight: false,
            outstanding: 0,
            stats: DeckStatus::default(),
            events,
            completions_tx,
            completions,
            updates,
            status,
        };

        let join = tokio::spawn(coordinator.run());
        (DeckHandle { events: events_tx, status: status_rx }, updates_rx, join)
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::HostGone,
                },
                Some(done) = self.completions.recv() => Step::Completion(done),
                run_id = self.scheduler.tick() => Step::Tick(run_id),
            };

            match step {
                Step::Event(event) => self.on_event(event),
                Step::Completion(done) => self.on_completion(done),
                Step::Tick(run_id) => {
                    debug!("scheduler tick (run {})", run_id);
                    self.on_tick();
                }
                Step::HostGone => break,
            }
            self.publish();
        }

        info!("host gone, shutting down");
        self.scheduler.stop();
        if time::timeout(SHUTDOWN_GRACE, self.drain()).await.is_err() {
            warn!("{} request(s) still outstanding at shutdown", self.outstanding);
        }
        self.publish();
    }

    /// Apply whatever is still in flight so the host sees final results.
    async fn drain(&mut self) {
        while self.outstanding > 0 {
            match self.completions.recv().await {
                Some(done) => self.on_completion(done),
                None => break,
            }
        }
    }

    fn publish(&mut self) {
        self.stats.registered = self.registry.count();
        self.stats.scheduler_running = self.scheduler.is_running();
        self.stats.scheduler_run_id = self.scheduler.run_id();
        self.stats.scheduler_starts = self.scheduler.starts();
        self.stats.snapshot_in_flight = self.snapshot_in_flight;
        self.status.send_replace(self.stats.clone());
    }

    fn emit(&self, update: PresentationUpdate) {
        if self.updates.send(update).is_err() {
            debug!("no one is listening for presentation updates");
        }
    }

    fn on_event(&mut self, event: DeckEvent) {
        match event {
            DeckEvent::WidgetAppeared { id, kind, settings } => self.register(id, kind, &settings),
            DeckEvent::WidgetSettingsChanged { id, settings } => match self.registry.get(&id) {
                Some(existing) => {
                    let kind = existing.kind();
                    self.register(id, kind, &settings);
                }
                None => debug!("settings for unknown widget {} ignored", id),
            },
            DeckEvent::WidgetDisappeared { id } => match self.registry.unregister(&id) {
                Some((_, now_empty)) => {
                    if now_empty {
                        self.scheduler.stop();
                    }
                }
                None => debug!("{} was not registered", id),
            },
            DeckEvent::GlobalSettingsChanged(settings) => self.apply_global_settings(settings),
            DeckEvent::Input { id, event } => self.on_input(&id, &event),
        }
    }

    fn register(&mut self, id: WidgetId, kind: WidgetKind, settings: &WidgetSettings) {
        let registered = self.registry.register(id.clone(), kind, settings);
        match registered.registration {
            Registration::First => {
                self.scheduler.start(self.settings.refresh_interval);
                // an older read is still out; show what we already have
                if !self.on_tick() && kind == WidgetKind::Button {
                    self.refresh_widget(&id);
                }
            }
            Registration::Added | Registration::Updated => self.refresh_widget(&id),
        }
    }

    /// Bring one widget up to date without waiting for the next tick.
    fn refresh_widget(&mut self, id: &WidgetId) {
        let Some(controller) = self.registry.get_mut(id) else {
            return;
        };
        match controller.kind() {
            WidgetKind::Dial => self.fetch_image(id),
            WidgetKind::Button => {
                controller.invalidate_presentation();
                if let Some(snapshot) = self.latest.clone() {
                    self.present_to(id, &snapshot);
                }
            }
        }
    }

    fn apply_global_settings(&mut self, settings: GlobalSettings) {
        let interval_changed = settings.refresh_interval != self.settings.refresh_interval;
        info!("global settings updated: {:?}", settings);
        self.settings = settings;

        if interval_changed && self.scheduler.is_running() {
            self.scheduler.restart(self.settings.refresh_interval);
            self.on_tick();
        }
    }

    fn on_input(&mut self, id: &WidgetId, event: &InputEvent) {
        let Some(controller) = self.registry.get(id) else {
            debug!("input for unknown widget {} ignored", id);
            return;
        };

        let reaction = match controller.reaction(event) {
            Ok(Some(reaction)) => reaction,
            Ok(None) => return,
            Err(e) => {
                warn!("{}: {}", id, e);
                return;
            }
        };

        if self.settings.credentials.is_none() {
            let e = BridgeError::ConfigurationMissing("credentials".into());
            warn!("{}: '{}' not sent, {}", id, reaction.action, e);
            return;
        }

        let bridge = Arc::clone(&self.bridge);
        let id = id.clone();
        self.spawn_request(async move {
            let result = bridge.dispatch_command(&reaction.action, reaction.payload).await;
            Completion::Dispatched { id, action: reaction.action, follow_up: reaction.follow_up, result }
        });
    }

    /// One shared snapshot for every button plus one image fetch per dial.
    /// Only the snapshot read is skipped while a previous one is outstanding.
    /// Returns false if the read was skipped.
    fn on_tick(&mut self) -> bool {
        let issued = if self.snapshot_in_flight {
            self.stats.skipped_ticks += 1;
            debug!("previous snapshot still outstanding, snapshot read skipped");
            false
        } else {
            self.stats.ticks += 1;
            self.snapshot_in_flight = true;
            let bridge = Arc::clone(&self.bridge);
            self.spawn_request(async move { Completion::Snapshot(bridge.fetch_state_snapshot().await) });
            true
        };

        for id in self.registry.dial_ids() {
            let busy = self.registry.get(&id).is_some_and(|c| c.fetch_in_flight());
            if busy {
                debug!("{}: image fetch still outstanding, not refetching", id);
                continue;
            }
            self.fetch_image(&id);
        }
        issued
    }

    fn fetch_image(&mut self, id: &WidgetId) {
        let Some(controller) = self.registry.get_mut(id) else {
            return;
        };
        let Some(ticket) = controller.fetch_ticket() else {
            debug!("{}: no image source configured", id);
            return;
        };
        controller.begin_fetch();

        let pipeline = Arc::clone(&self.pipeline);
        let id = id.clone();
        self.spawn_request(async move {
            let result = pipeline.fetch(&ticket.source).await;
            Completion::Image { id, ticket, result }
        });
    }

    fn spawn_request<F>(&mut self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.outstanding += 1;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            if tx.send(request.await).is_err() {
                debug!("coordinator gone, request result dropped");
            }
        });
    }

    fn on_completion(&mut self, done: Completion) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match done {
            Completion::Snapshot(result) => {
                self.snapshot_in_flight = false;
                match result {
                    Ok(snapshot) => self.fan_out(snapshot),
                    Err(e) => warn!("state snapshot failed, keeping current presentation: {}", e),
                }
            }
            Completion::ButtonRefresh { id, result } => match result {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    self.latest = Some(Arc::clone(&snapshot));
                    self.present_to(&id, &snapshot);
                }
                Err(e) => warn!("{}: refresh after command failed: {}", id, e),
            },
            Completion::Dispatched { id, action, follow_up, result } => match result {
                Ok(_) => self.follow_up(&id, follow_up),
                Err(e) => {
                    self.stats.dispatch_failures += 1;
                    warn!("{}: command '{}' failed: {}", id, action, e);
                }
            },
            Completion::Image { id, ticket, result } => self.apply_image(&id, &ticket, result),
        }
    }

    fn fan_out(&mut self, snapshot: StateSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.latest = Some(Arc::clone(&snapshot));

        let mut changed = Vec::new();
        for button in self.registry.buttons_mut() {
            if let Some(key) = button.present(&snapshot) {
                changed.push(PresentationUpdate::SetImageKey { context: button.id().clone(), key });
            }
        }
        for update in changed {
            self.emit(update);
        }
    }

    fn present_to(&mut self, id: &WidgetId, snapshot: &StateSnapshot) {
        let Some(controller) = self.registry.get_mut(id) else {
            return;
        };
        if let Some(key) = controller.present(snapshot) {
            self.emit(PresentationUpdate::SetImageKey { context: id.clone(), key });
        }
    }

    fn follow_up(&mut self, id: &WidgetId, follow_up: FollowUp) {
        if !self.registry.contains(id) {
            debug!("{} went away before its follow-up", id);
            return;
        }
        match follow_up {
            FollowUp::RefetchImage => self.fetch_image(id),
            FollowUp::RefreshPresentation => {
                let bridge = Arc::clone(&self.bridge);
                let id = id.clone();
                self.spawn_request(async move {
                    let result = bridge.fetch_state_snapshot().await;
                    Completion::ButtonRefresh { id, result }
                });
            }
        }
    }

    fn apply_image(&mut self, id: &WidgetId, ticket: &FetchTicket, result: Result<DataUri, ImageFetchError>) {
        let Some(controller) = self.registry.get_mut(id) else {
            self.stats.discarded_results += 1;
            debug!("{}: image for unregistered widget dropped", id);
            return;
        };
        controller.finish_fetch(ticket);

        if !controller.accepts(ticket) {
            self.stats.discarded_results += 1;
            debug!("{}: stale image for {} dropped", id, ticket.source);
            return;
        }

        match result {
            Ok(data_uri) => self.emit(PresentationUpdate::SetImage { context: id.clone(), data_uri }),
            Err(e) => {
                self.stats.image_failures += 1;
                warn!("{}: {}, showing placeholder", id, e);
                self.emit(PresentationUpdate::SetImageKey { context: id.clone(), key: self.placeholder.clone() });
            }
        }
    }
}
