//! Composition root.
//!
//! Builds every shared object explicitly and hands out references; there
//! is no process-wide state. One [`OtaRuntime`] corresponds to one MQTT
//! connection.
//!
//! ```text
//!  Arc<dyn MqttAgent> ──▶ CommandBridge ──┬──▶ BridgeConnection ──▶ OtaAgent<P> ◀── AgentService
//!                                         │         │                  │
//!                                         │   InboundDispatch ──Weak───┘
//!                                         │     │        │
//!                                         │  BufferPool  JobWorker ──▶ CommandQueue ──▶ AgentService
//!                                         └──▶ JobActionDispatcher (job-worker thread)
//! ```
//!
//! The engine owns its connection, the connection owns the dispatch and
//! the dispatch reaches the engine back through a `Weak`, so the graph has
//! no reference cycle.

use std::sync::{Arc, Weak};

use log::{info, warn};

use crate::adapters::device_id;
use crate::app::callback::AgentCallback;
use crate::app::commands::CommandQueue;
use crate::app::ports::{EventSink, ImagePlatform, OtaConnection, UpdateEngine};
use crate::app::service::{AgentService, RunSummary};
use crate::config::{AgentConfig, ThingName};
use crate::dispatch::{BridgeConnection, InboundDispatch};
use crate::error::{Error, Result};
use crate::jobs::action::JobActionDispatcher;
use crate::jobs::topics::update_response_filter;
use crate::jobs::worker::JobWorker;
use crate::mqtt::agent::{MqttAgent, QoS};
use crate::mqtt::bridge::CommandBridge;
use crate::ota::agent::{EngineConfig, OtaAgent};
use crate::pool::BufferPool;

pub struct OtaRuntime<P: ImagePlatform + 'static> {
    config: AgentConfig,
    thing_name: ThingName,
    pool: Arc<BufferPool>,
    bridge: Arc<CommandBridge>,
    engine: Arc<OtaAgent<P>>,
    dispatch: Arc<InboundDispatch>,
    jobs: Arc<JobWorker>,
    service: AgentService,
}

impl<P: ImagePlatform + 'static> OtaRuntime<P> {
    /// Wire the bridge, pool, engine and job worker around `agent`.
    pub fn new(config: AgentConfig, agent: Arc<dyn MqttAgent>, platform: P) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let thing_name = device_id::resolve_thing_name(&config.thing_name);

        let pool = Arc::new(BufferPool::new(
            usize::from(config.data_buffers),
            config.max_block_size(),
        ));
        let bridge = Arc::new(CommandBridge::new(agent, config.mqtt_timeout()));
        let jobs = Arc::new(JobWorker::new());
        let commands: Arc<CommandQueue> = Arc::new(CommandQueue::new());

        let mut dispatch_slot = None;
        let engine = Arc::new_cyclic(|me: &Weak<OtaAgent<P>>| {
            let engine: Weak<dyn UpdateEngine> = me.clone();
            let dispatch = Arc::new(InboundDispatch::new(
                Arc::clone(&pool),
                engine,
                Arc::clone(&jobs),
                thing_name.clone(),
            ));
            let connection = BridgeConnection::new(Arc::clone(&bridge), Arc::clone(&dispatch));
            dispatch_slot = Some(dispatch);
            OtaAgent::new(
                EngineConfig::new(&config, thing_name.clone()),
                platform,
                Box::new(connection),
                Box::new(AgentCallback::new(Arc::clone(&pool))),
            )
        });
        let dispatch = dispatch_slot.ok_or(Error::Init("inbound dispatch not built"))?;

        let service = AgentService::new(
            Arc::clone(&engine) as Arc<dyn UpdateEngine>,
            commands,
            &config,
        );
        info!(
            "Runtime: thing '{}', {} x {} byte buffers",
            thing_name,
            pool.capacity(),
            pool.slot_size()
        );

        Ok(Self {
            config,
            thing_name,
            pool,
            bridge,
            engine,
            dispatch,
            jobs,
            service,
        })
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn bridge(&self) -> &Arc<CommandBridge> {
        &self.bridge
    }

    pub fn engine(&self) -> &Arc<OtaAgent<P>> {
        &self.engine
    }

    pub fn dispatch(&self) -> &Arc<InboundDispatch> {
        &self.dispatch
    }

    pub fn service(&self) -> &AgentService {
        &self.service
    }

    /// Queue for suspend/resume/shutdown requests from other threads.
    pub fn commands(&self) -> Arc<CommandQueue> {
        Arc::clone(self.service.commands())
    }

    /// Run until the engine stops, then stop the job worker.
    pub fn run(&self, sink: &mut dyn EventSink) -> Result<RunSummary> {
        let acks = BridgeConnection::new(Arc::clone(&self.bridge), Arc::clone(&self.dispatch));
        match update_response_filter(&self.thing_name) {
            Ok(filter) => {
                if acks.subscribe(&filter, QoS::AtLeastOnce).is_err() {
                    warn!("Runtime: job status responses will not be logged");
                }
            }
            Err(e) => warn!("Runtime: {}", e),
        }

        let dispatcher = JobActionDispatcher::new(
            Arc::clone(&self.bridge),
            self.thing_name.clone(),
            self.config.report_unknown_actions,
        );
        let worker = self
            .jobs
            .start(dispatcher, self.commands())
            .map_err(|_| Error::Init("job worker spawn failed"))?;

        let summary = self.service.run(sink);

        self.jobs.stop();
        if worker.join().is_err() {
            warn!("Runtime: job worker panicked");
        }
        summary
    }
}
