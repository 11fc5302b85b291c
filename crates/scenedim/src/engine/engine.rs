use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::event::SceneEvent;
use crate::dimmer::Dimmer;
use crate::dimmer::Resolution;

/// Sender half of the scene event bus, handed to integrations.
pub type SceneBus = broadcast::Sender<SceneEvent>;

/// Capacity of the scene event bus.
/// A receiver that falls further behind than this skips the oldest events.
const SCENE_BUS_CAPACITY: usize = 256;

/// scenedim engine
///
/// Owns every configured dimmer and feeds them the scene events integrations
/// publish on the bus.
pub struct Engine {
    dimmers: Vec<Dimmer>,

    /// Publish scene events (cloned out to integrations)
    bus_tx: SceneBus,

    /// Subscribed at construction so nothing published before `run` is lost
    bus_rx: Mutex<broadcast::Receiver<SceneEvent>>,
}

impl Engine {
    pub fn new() -> Self {
        let (bus_tx, bus_rx) = broadcast::channel(SCENE_BUS_CAPACITY);
        Self {
            dimmers: Vec::new(),
            bus_tx,
            bus_rx: Mutex::new(bus_rx),
        }
    }

    /// Get a sender for publishing scene events
    pub fn bus(&self) -> SceneBus {
        self.bus_tx.clone()
    }

    pub fn add_dimmer(&mut self, dimmer: Dimmer) {
        info!(
            "Activated scene listener for: {} -> {}",
            dimmer.switch_id(),
            dimmer.config().light_id
        );
        self.dimmers.push(dimmer);
    }

    pub fn dimmers(&self) -> &[Dimmer] {
        &self.dimmers
    }

    /// Offer one event to every dimmer. Returns how many acted on it.
    pub fn dispatch(&self, event: &SceneEvent) -> usize {
        let mut handled = 0;
        for dimmer in &self.dimmers {
            if let Resolution::Action(_) = dimmer.handle_event(event) {
                handled += 1;
            }
        }

        if handled == 0 {
            debug!(
                "No dimmer handled scene ({}, {:?}) from {}",
                event.scene_id, event.scene_data, event.entity_id
            );
        }
        handled
    }

    /// Run the engine's main event loop
    ///
    /// Returns when `shutdown` fires (or its sender is dropped) or when every
    /// bus sender is gone.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        info!("Engine starting with {} dimmer(s)", self.dimmers.len());

        let mut rx = self.bus_rx.lock().await;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Engine received shutdown signal");
                    break;
                }
                msg = rx.recv() => match msg {
                    Ok(event) => {
                        self.dispatch(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Engine lagged behind the scene bus, skipped {} event(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Scene bus closed");
                        break;
                    }
                },
            }
        }

        info!("Engine shutting down");
    }

    /// Stop every dimmer and wait up to `grace` for their ramps to exit
    ///
    /// Returns false if some loop was still blocked on its light when the
    /// grace period ran out; such loops are abandoned.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        for dimmer in &self.dimmers {
            dimmer.deactivate();
        }

        let wait_all = async {
            for dimmer in &self.dimmers {
                dimmer.shutdown().await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_ok() {
            return true;
        }

        for dimmer in &self.dimmers {
            let stuck = dimmer.active_loops();
            if stuck > 0 {
                warn!(
                    "[{}] Abandoning {} ramp loop(s) still waiting on {}",
                    dimmer.switch_id(),
                    stuck,
                    dimmer.config().light_id
                );
            }
        }
        false
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
