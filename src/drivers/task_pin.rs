//! Named thread spawning with core affinity, priority and stack size.
//!
//! Every long-lived thread in the bridge is described by a [`TaskSpec`]
//! so its placement is decided in one table:
//!
//! | Task | Core | Prio | Stack | Runs |
//! |------|------|------|-------|------|
//! | `mqtt-agent` | Pro | 6 | 16 KB | simulated MQTT agent command loop |
//! | `ota-agent` | App | 5 | 24 KB | update engine event-processing loop |
//! | `job-worker` | App | 4 | 16 KB | custom job actions |
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread, so the config→spawn pair must not be interleaved
//! with other thread creation on the same thread.

use std::io;
use std::thread::JoinHandle;

/// CPU core identifiers for the ESP32 Xtensa dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): protocol stacks (WiFi, lwIP, MQTT).
    Pro = 0,
    /// Core 1 (APP_CPU): application logic.
    App = 1,
}

/// Placement of one thread. `name` must be null-terminated.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskSpec {
    fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

pub const MQTT_AGENT_TASK: TaskSpec = TaskSpec {
    name: "mqtt-agent\0",
    core: Core::Pro,
    priority: 6,
    stack_kb: 16,
};

pub const OTA_AGENT_TASK: TaskSpec = TaskSpec {
    name: "ota-agent\0",
    core: Core::App,
    priority: 5,
    stack_kb: 24,
};

pub const JOB_WORKER_TASK: TaskSpec = TaskSpec {
    name: "job-worker\0",
    core: Core::App,
    priority: 4,
    stack_kb: 16,
};

/// Spawn a thread pinned to `spec.core` with the given priority and stack.
#[cfg(target_os = "espidf")]
pub fn spawn(spec: TaskSpec, f: impl FnOnce() + Send + 'static) -> io::Result<JoinHandle<()>> {
    debug_assert!(spec.name.ends_with('\0'), "task name must be null-terminated");
    // SAFETY: the config is copied by esp_pthread_set_cfg and only applies
    // to the next pthread_create on this thread, which is the spawn below.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = spec.priority as i32;
        cfg.stack_size = (spec.stack_kb * 1024) as _;
        cfg.thread_name = spec.name.as_ptr() as *const _;
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK {
        return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
    }

    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        spec.display_name(),
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(spec.display_name().into())
        .spawn(f)
}

/// Host builds run unoptimised serde/logging code, so stacks get a floor.
#[cfg(not(target_os = "espidf"))]
const HOST_MIN_STACK: usize = 256 * 1024;

/// Simulation fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn(spec: TaskSpec, f: impl FnOnce() + Send + 'static) -> io::Result<JoinHandle<()>> {
    log::info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        spec.display_name(),
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(spec.display_name().into())
        .stack_size((spec.stack_kb * 1024).max(HOST_MIN_STACK))
        .spawn(f)
}
