use async_trait::async_trait;

/// Failure of a single brightness adjustment.
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The host's "adjust brightness by a signed step" service.
///
/// Implementations return once the host has accepted the command, so the
/// caller can serialize pulses behind it.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn adjust_brightness(&self, light_id: &str, step: i64) -> Result<(), ActuationError>;
}

/// Actuator that records every completed call, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingActuator {
    pub calls: std::sync::Mutex<Vec<(String, i64)>>,
    pub fail: std::sync::atomic::AtomicBool,
    pub hang_negative: std::sync::atomic::AtomicBool,
    pub hung: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail.
    pub fn fail_from_now(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every following dimming call block forever.
    pub fn hang_dimming(&self) {
        self.hang_negative
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Calls currently blocked by `hang_dimming`.
    pub fn hung_calls(&self) -> usize {
        self.hung.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Actuator for RecordingActuator {
    async fn adjust_brightness(&self, light_id: &str, step: i64) -> Result<(), ActuationError> {
        use std::sync::atomic::Ordering;

        if self.fail.load(Ordering::SeqCst) {
            return Err(ActuationError::Transport(
                format!("{} is unreachable", light_id).into(),
            ));
        }
        if step < 0 && self.hang_negative.load(Ordering::SeqCst) {
            self.hung.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        self.calls.lock().unwrap().push((light_id.to_string(), step));
        Ok(())
    }
}
