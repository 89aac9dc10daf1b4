//! Runtime symbol providers for third-party crates.
//!
//! `async-io-mini` timers (and through them every bounded wait in
//! [`crate::events::wait_timeout`]) call into an `embassy-time` driver, and
//! the `embassy-sync` mutexes need a `critical-section` implementation.
//!
//! | Symbol                            | ESP-IDF                    | Host                          |
//! |-----------------------------------|----------------------------|-------------------------------|
//! | `_embassy_time_now`               | `esp_timer_get_time()` µs  | `embassy-time` `std` driver   |
//! | `_embassy_time_schedule_wake`     | sleeper thread per wake    | `embassy-time` `std` driver   |
//! | `_critical_section_1_0_acquire`   | process-wide mutex         | `critical-section` `std` impl |
//! | `_critical_section_1_0_release`   | process-wide mutex         | `critical-section` `std` impl |
//!
//! Both sides tick at 1 MHz.

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
#[cfg(target_os = "espidf")]
use core::task::Waker;
#[cfg(target_os = "espidf")]
use core::time::Duration;
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static CRITICAL_SECTION_DEPTH: Cell<u8> = const { Cell::new(0) };
    static CRITICAL_SECTION_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

/// Re-entrant acquire for `critical-section` 1.x. Only the outermost call
/// takes the lock.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                let lock = CRITICAL_SECTION_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
                *guard.borrow_mut() = Some(lock);
            }
            let new_depth = d.saturating_add(1);
            depth.set(new_depth);
            new_depth
        })
    })
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                return;
            }
            let new_depth = d - 1;
            depth.set(new_depth);
            if new_depth == 0 {
                *guard.borrow_mut() = None;
            }
        })
    })
}

/// Microseconds since boot.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub fn _embassy_time_now() -> u64 {
    // SAFETY: esp_timer is started by the IDF before app_main.
    unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
}

/// Wake `waker` once `at` (in µs since boot) has passed.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
    let now = _embassy_time_now();
    if at <= now {
        waker.wake_by_ref();
        return;
    }
    let deferred = waker.clone();
    let spawned = std::thread::Builder::new()
        .name("time-wake".into())
        .stack_size(2048)
        .spawn(move || {
            std::thread::sleep(Duration::from_micros(at - _embassy_time_now().min(at)));
            deferred.wake();
        });
    if let Err(e) = spawned {
        // An early wake is harmless: the timer re-arms when polled before its deadline.
        warn!("Runtime: timer wake thread not spawned ({}), waking early", e);
        waker.wake_by_ref();
    }
}
