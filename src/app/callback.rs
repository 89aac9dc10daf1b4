//! Application side of the engine's life-cycle notifications.

use std::sync::Arc;

use log::{error, info, warn};

use crate::ota::{ImageState, OtaJobEvent};
use crate::pool::BufferPool;

use super::ports::{OtaAppCallback, UpdateEngine};

/// Handles [`OtaJobEvent`]s on the engine's thread.
pub struct AgentCallback {
    pool: Arc<BufferPool>,
}

impl AgentCallback {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }
}

impl OtaAppCallback for AgentCallback {
    fn on_job_event(&self, engine: &dyn UpdateEngine, event: OtaJobEvent) {
        match event {
            OtaJobEvent::Activate => {
                info!("OTA: new image received, activating");
                if let Err(e) = engine.activate_new_image() {
                    error!("OTA: activation failed: {}", e);
                }
                // Reached only when activation does not restart the device.
                engine.shutdown();
            }
            OtaJobEvent::Fail => warn!("OTA: update job failed"),
            OtaJobEvent::StartTest => match engine.set_image_state(ImageState::Accepted) {
                Ok(()) => info!("OTA: new image accepted"),
                Err(e) => error!("OTA: cannot accept new image: {}", e),
            },
            OtaJobEvent::Processed(buffer) => self.pool.release(buffer),
            OtaJobEvent::SelfTestFailed => {
                error!("OTA: self-test failed, shutting down");
                engine.shutdown();
            }
        }
    }
}
