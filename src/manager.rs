use std::future::Future;

use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::engine::{InboundEvents as _, PresenceEngine, PresenceUpdate};
use crate::messages::EngineEvent;
use crate::mqtt::MqttClient;

/// Where computed presence ends up
pub trait StateSink {
    fn publish(&self, update: &PresenceUpdate) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl StateSink for MqttClient {
    async fn publish(&self, update: &PresenceUpdate) -> anyhow::Result<()> {
        self.publish_presence(update).await
    }
}

pub struct Manager<S> {
    engine: PresenceEngine,
    sink: S,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

impl<S: StateSink> Manager<S> {
    pub fn new(engine: PresenceEngine, sink: S) -> Self {
        Manager { engine, sink }
    }

    /// Drive the engine from `rx` and the liveness timers until the event
    /// stream closes. Returns the sink so the caller can shut it down.
    pub async fn run_loop(mut self, mut rx: mpsc::Receiver<EngineEvent>) -> S {
        let updates = self.engine.on_reset();
        self.publish_all(&updates).await;

        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                // Events already queued go first, so a refresh always beats
                // the expiry it supersedes
                biased;

                event = rx.recv() => match event {
                    Some(EngineEvent::Observation { topic, payload }) => {
                        match self.engine.on_observation(&topic, &payload, Instant::now()) {
                            Ok(Some(update)) => self.publish_all(&[update]).await,
                            Ok(None) => {}
                            Err(err) => error!("Dropping observation: {}", err),
                        }
                    }
                    Some(EngineEvent::Reset) => {
                        info!("Reset event received");
                        let updates = self.engine.on_reset();
                        self.publish_all(&updates).await;
                    }
                    None => {
                        debug!("Event stream closed");
                        break;
                    }
                },
                _ = wait_until(deadline) => {
                    let updates = self.engine.on_expiry(Instant::now());
                    self.publish_all(&updates).await;
                }
            }
        }

        info!("Exiting manager event loop");
        self.sink
    }

    async fn publish_all(&self, updates: &[PresenceUpdate]) {
        for update in updates {
            if let Err(err) = self.sink.publish(update).await {
                error!("Error publishing state for {}: {:?}", update.entity_id, err);
            }
        }
    }
}
