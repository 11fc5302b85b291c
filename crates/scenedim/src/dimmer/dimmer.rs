use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::trace;

use super::ramp::LoopTracker;
use super::ramp::Ramp;
use super::ramp::RampFlag;
use super::scene::Direction;
use super::scene::Resolution;
use super::scene::SceneAction;
use super::scene::SceneMatcher;
use super::scene::ScenePair;
use crate::engine::Actuator;
use crate::engine::SceneEvent;

/// Step used when neither the dimmer nor `[defaults]` sets one.
pub const DEFAULT_STEP: u32 = 10;

/// Delay between pulses when neither the dimmer nor `[defaults]` sets one.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Validated settings for one switch/light pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct DimmerConfig {
    /// Switch whose scene events drive this dimmer.
    pub switch_id: String,

    /// Light the ramp adjusts.
    pub light_id: String,

    pub bright: ScenePair,
    pub dim: ScenePair,

    /// Brightness change per pulse, always positive.
    pub step: u32,

    /// Pause between pulses, always positive.
    pub delay: Duration,
}

/// Turns press/release scene events from one switch into brightness ramps.
///
/// Each direction has its own run flag. A start sets the flag and spawns a
/// loop that pulses the light until the flag is cleared; loops are never
/// cancelled through a handle. Starting a direction that is already running
/// spawns a second loop, and one stop ends both.
pub struct Dimmer {
    config: DimmerConfig,
    matcher: SceneMatcher,
    switch_id: Arc<str>,
    light_id: Arc<str>,
    bright: Arc<RampFlag>,
    dim: Arc<RampFlag>,
    loops: Arc<LoopTracker>,
    actuator: Arc<dyn Actuator>,
}

impl Dimmer {
    pub fn new(config: DimmerConfig, actuator: Arc<dyn Actuator>) -> Self {
        let matcher = SceneMatcher::new(config.switch_id.clone(), config.bright, config.dim);
        Self {
            switch_id: Arc::from(config.switch_id.as_str()),
            light_id: Arc::from(config.light_id.as_str()),
            config,
            matcher,
            bright: Arc::default(),
            dim: Arc::default(),
            loops: Arc::default(),
            actuator,
        }
    }

    pub fn config(&self) -> &DimmerConfig {
        &self.config
    }

    pub fn switch_id(&self) -> &str {
        &self.config.switch_id
    }

    pub fn is_brightening(&self) -> bool {
        self.bright.is_active()
    }

    pub fn is_dimming(&self) -> bool {
        self.dim.is_active()
    }

    /// Number of ramp loops that have not exited yet.
    pub fn active_loops(&self) -> usize {
        self.loops.running()
    }

    /// Match a bus event against this switch and apply the resulting action.
    ///
    /// Must be called from within a tokio runtime, since a start spawns a task.
    pub fn handle_event(&self, event: &SceneEvent) -> Resolution {
        let resolution = self.matcher.resolve(event);
        match resolution {
            Resolution::NotMine => {
                trace!("[{}] Ignoring switch_id: {}", self.switch_id, event.entity_id);
            }
            Resolution::Unrecognized(key) => {
                debug!("[{}] Ignoring scene: {}", self.switch_id, key);
            }
            Resolution::Action(action) => {
                debug!(
                    "[{}] Got scene: ({}, {:?}) at timestamp: {}",
                    self.switch_id,
                    event.scene_id,
                    event.scene_data,
                    event.time_fired.as_deref().unwrap_or("unknown")
                );
                self.apply(action);
            }
        }
        resolution
    }

    pub fn apply(&self, action: SceneAction) {
        match action {
            SceneAction::StartBright => self.start(Direction::Bright),
            SceneAction::StopBright => self.stop(Direction::Bright),
            SceneAction::StartDim => self.start(Direction::Dim),
            SceneAction::StopDim => self.stop(Direction::Dim),
        }
    }

    fn flag(&self, direction: Direction) -> &Arc<RampFlag> {
        match direction {
            Direction::Bright => &self.bright,
            Direction::Dim => &self.dim,
        }
    }

    fn start(&self, direction: Direction) {
        let flag = self.flag(direction);
        let generation = flag.activate();

        let ramp = Ramp {
            direction,
            switch_id: Arc::clone(&self.switch_id),
            light_id: Arc::clone(&self.light_id),
            step: self.config.step,
            delay: self.config.delay,
            flag: Arc::clone(flag),
            generation,
            actuator: Arc::clone(&self.actuator),
            guard: self.loops.enter(),
        };

        debug!(
            "[{}] Starting {} ramp on {} ({} loop(s) running)",
            self.switch_id,
            direction,
            self.light_id,
            self.loops.running()
        );
        tokio::spawn(ramp.run());
    }

    fn stop(&self, direction: Direction) {
        if self.flag(direction).deactivate() {
            debug!("[{}] Stopping {} ramp", self.switch_id, direction);
        } else {
            debug!("[{}] {} ramp already stopped", self.switch_id, direction);
        }
    }

    /// Clear both flags. Running loops exit at their next check.
    pub fn deactivate(&self) {
        self.bright.deactivate();
        self.dim.deactivate();
    }

    /// Clear both flags and wait until every loop has exited.
    ///
    /// A loop blocked on the actuator finishes that pulse first, so this
    /// never resolves while an actuation hangs; bound it with a timeout.
    pub async fn shutdown(&self) {
        self.deactivate();
        self.loops.wait_idle().await;
        info!("[{}] Dimmer stopped", self.switch_id);
    }
}

impl std::fmt::Debug for Dimmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dimmer")
            .field("config", &self.config)
            .field("brightening", &self.is_brightening())
            .field("dimming", &self.is_dimming())
            .field("active_loops", &self.active_loops())
            .field("actuator", &"<actuator>")
            .finish()
    }
}
