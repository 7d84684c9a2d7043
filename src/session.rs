//! Client session: the cooperative poll and edit loop.
//!
//! A single task owns the options model, sample history, renderer state and
//! scheduler. It suspends only on device requests and timer waits, so one
//! poll cycle (fetch, ingest, render, present) always completes before the
//! next command or cycle is handled, and at most one request per concern is
//! ever in flight.

use crate::config::ClientConfig;
use crate::display::FrameSink;
use crate::error::{SubmitError, SyncError, TransportError, COMMUNICATION_FAILED, REVERT_FAILED};
use crate::history::SampleHistoryBuffer;
use crate::options::{ConfigSyncModel, FieldState, ModelEvent, Switch};
use crate::remote::RemoteState;
use crate::render::{FadingRenderer, Highlight, Raster};
use crate::scheduler::{PollDecision, PollScheduler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Commands from the presentation layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum ControlCommand {
    SetField { name: String, value: Value },
    Toggle { name: String },
    Submit,
    Reset,
    GetStatus,
}

/// A command together with the channel its response goes back on.
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: oneshot::Sender<ControlResponse>,
}

/// One option as shown to the presentation layer.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FieldView {
    pub value: Value,
    #[serde(flatten)]
    pub state: FieldState,
}

/// Counters for the polling loop.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub failures: u64,
    pub samples_drawn: u64,
}

/// Snapshot of everything the presentation layer displays.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SessionView {
    pub interactive: bool,
    pub pending_changes: usize,
    pub fields: BTreeMap<String, FieldView>,
    pub current_frequency: Option<f64>,
    pub headline: Option<String>,
    pub last_seen_id: Option<i64>,
    pub stats: PollStats,
}

/// Response to a [`ControlCommand`].
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ModelEvent>,
    pub view: SessionView,
}

/// The running client.
pub struct Session<R, S> {
    remote: R,
    sink: S,
    model: ConfigSyncModel,
    history: SampleHistoryBuffer,
    renderer: FadingRenderer,
    raster: Raster,
    scheduler: PollScheduler,
    current_frequency: Option<f64>,
    /// Cleared by the next successful poll.
    poll_error: Option<String>,
    /// Cleared by the next successful submit or reset.
    options_error: Option<String>,
    stats: PollStats,
}

impl<R: RemoteState, S: FrameSink> Session<R, S> {
    pub fn new(remote: R, sink: S, config: &ClientConfig) -> Self {
        let renderer = FadingRenderer::new(
            config.canvas_width,
            config.canvas_height,
            config.header_height,
            config.strength_floor,
        );
        let raster = renderer.blank_raster();

        Self {
            remote,
            sink,
            model: ConfigSyncModel::new(),
            history: SampleHistoryBuffer::new(),
            renderer,
            raster,
            scheduler: PollScheduler::new(config.poll_floor()),
            current_frequency: None,
            poll_error: None,
            options_error: None,
            stats: PollStats::default(),
        }
    }

    pub fn model(&self) -> &ConfigSyncModel {
        &self.model
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Error line shown on the display; polling failures take precedence.
    pub fn headline(&self) -> Option<&str> {
        self.poll_error.as_deref().or(self.options_error.as_deref())
    }

    /// Drive polling and commands until shutdown is signalled.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Session started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_time = self.model.confirmed_sleep_time().unwrap_or(Duration::ZERO);
            let delay = match self.scheduler.decide(Instant::now(), sleep_time) {
                PollDecision::FetchNow => {
                    self.poll_cycle().await;
                    continue;
                }
                PollDecision::WaitFor(delay) => delay,
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(request) = commands.recv() => {
                    let response = self.handle(request.command).await;
                    if request.reply.send(response).is_err() {
                        debug!("Control client went away before the response");
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Session stopped");
    }

    /// Run one poll cycle.
    ///
    /// Until the options have been loaded the cycle fetches them instead of
    /// the status, since nothing can be mapped without a frequency frame.
    /// Failures are recorded and never stop the loop. Model events stay
    /// queued for the next command response.
    pub async fn poll_cycle(&mut self) {
        self.scheduler.begin_fetch(Instant::now());
        let result = if self.model.is_loaded() {
            self.fetch_and_render().await
        } else {
            self.model.reset(&self.remote).await.map(|()| Vec::new())
        };
        self.scheduler.finish_fetch();

        self.stats.cycles += 1;
        let highlights = match result {
            Ok(highlights) => {
                self.poll_error = None;
                highlights
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!(error = %e, "Poll cycle failed");
                self.poll_error = Some(COMMUNICATION_FAILED.to_string());
                Vec::new()
            }
        };
        self.present(&highlights);
    }

    async fn fetch_and_render(&mut self) -> Result<Vec<Highlight>, TransportError> {
        let status = self.remote.fetch_status().await?;
        let fresh = self.history.ingest(&status.signal_strength_history);

        let pass = self.renderer.render(&self.raster, &fresh, &self.model.frame());
        self.stats.samples_drawn += pass.highlights.len() as u64;
        self.current_frequency = Some(status.current_frequency);
        self.raster = pass.raster;

        Ok(pass.highlights)
    }

    /// Compose and hand the visible frame to the sink.
    ///
    /// Nothing is shown before the first status arrives.
    fn present(&mut self, highlights: &[Highlight]) {
        let Some(current_frequency) = self.current_frequency else {
            return;
        };

        let display = self.renderer.compose(
            &self.raster,
            highlights,
            current_frequency,
            self.headline(),
            &self.model.frame(),
        );
        if let Err(e) = self.sink.present(&display) {
            warn!(error = %e, "Failed to present frame");
        }
    }

    /// Apply one command from the presentation layer.
    pub async fn handle(&mut self, command: ControlCommand) -> ControlResponse {
        let outcome: Result<(), String> = match command {
            ControlCommand::SetField { name, value } => self
                .model
                .set_field(&name, value)
                .map_err(|e| self.refuse(e)),
            ControlCommand::Toggle { name } => match self.model.toggle(&name) {
                Ok(switch) => {
                    debug!(name = %name, on = (switch == Switch::On), "Switch toggled");
                    Ok(())
                }
                Err(e) => Err(self.refuse(e)),
            },
            ControlCommand::Submit => self.submit().await,
            ControlCommand::Reset => self.reset().await,
            ControlCommand::GetStatus => Ok(()),
        };

        ControlResponse {
            success: outcome.is_ok(),
            error: outcome.err(),
            events: self.model.take_events(),
            view: self.view(),
        }
    }

    fn refuse(&self, error: SyncError) -> String {
        if self.model.is_loaded() {
            warn!(error = %error, "Edit refused");
        } else {
            debug!(error = %error, "Edit before options were loaded");
        }
        error.to_string()
    }

    async fn submit(&mut self) -> Result<(), String> {
        match self.model.submit(&self.remote).await {
            Ok(()) => {
                self.options_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Options submission failed");
                if !matches!(e, SubmitError::Refused(_)) {
                    self.options_error = e.headline();
                }
                Err(e.to_string())
            }
        }
    }

    async fn reset(&mut self) -> Result<(), String> {
        match self.model.reset(&self.remote).await {
            Ok(()) => {
                info!("Options reverted to device state");
                self.options_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Options revert failed");
                self.options_error = Some(REVERT_FAILED.to_string());
                Err(e.to_string())
            }
        }
    }

    /// Current state for the presentation layer.
    pub fn view(&self) -> SessionView {
        let fields = self
            .model
            .field_names()
            .filter_map(|name| {
                let value = self.model.value(name)?.clone();
                let state = self.model.field_state(name)?.clone();
                Some((name.to_string(), FieldView { value, state }))
            })
            .collect();

        SessionView {
            interactive: self.model.is_interactive(),
            pending_changes: self.model.pending_changes(),
            fields,
            current_frequency: self.current_frequency,
            headline: self.headline().map(str::to_string),
            last_seen_id: self.history.last_seen_id(),
            stats: self.stats,
        }
    }
}
