//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! over the in-process loopback MQTT agent and the simulated flash
//! platform. All tests run on the host (x86_64) with no broker or real
//! hardware required.

mod bridge_tests;
mod dispatch_tests;
mod end_to_end_tests;
mod harness;
mod job_tests;
mod lifecycle_tests;
