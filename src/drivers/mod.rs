//! Platform helpers below the adapters.

pub mod task_pin;
