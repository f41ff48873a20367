//! Virtual Platform Timer core.
//!
//! Presents architectural periodic interrupt sources (legacy PIT, RTC, HPET,
//! per-vCPU LAPIC timer) to a guest vCPU by scheduling host-side timers,
//! accumulating missed ticks, and injecting virtual interrupts under one of
//! four tick-delivery policies.
//!
//! The device models that actually emulate PIT/RTC/HPET/LAPIC registers are
//! not part of this crate; they call [`create_periodic_time`] /
//! [`destroy_periodic_time`] and supply an acknowledgement callback. Host
//! timer wheel, guest clock, IRQ controllers and vCPU scheduler are all
//! external collaborators, reached through the traits in [`collab`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod collab;
pub mod entry;
pub mod injector;
pub mod masking;
pub mod policy;
pub mod vcpu_set;

#[cfg(test)]
mod scenarios;

pub use collab::{GuestClock, HostTimerWheel, IrqController, TimerModeSource, VcpuScheduler};
pub use entry::{IntAck, IntSource, TimerEntry, TimerSource};
pub use injector::{intr_post, update_irq};
pub use masking::{is_masked, vector};
pub use policy::TickPolicy;
pub use vcpu_set::{VcpuId, VcpuTimerSet};

/// Minimum period, in nanoseconds, enforced on periodic (non-one-shot) timers.
///
/// Matches the original 900 microsecond clamp; one-shot timers are exempt.
pub const MIN_PERIODIC_PERIOD_NS: u64 = 900_000;

/// Register a new periodic or one-shot timer on `vcpu`.
///
/// Idempotent: any prior state on `entry` is destroyed first. See
/// `entry::create_periodic_time` for the full contract.
pub fn create_periodic_time(
    vcpu: &alloc::sync::Arc<VcpuTimerSet>,
    entry: &alloc::sync::Arc<TimerEntry>,
    params: entry::CreateParams,
    env: &dyn collab::Env,
) {
    entry::create_periodic_time(vcpu, entry, params, env);
}

/// Tear down `entry`, quiescing any in-flight host-timer callback.
///
/// Safe to call on an entry that was never created, or already destroyed.
pub fn destroy_periodic_time(entry: &alloc::sync::Arc<TimerEntry>, env: &dyn collab::Env) {
    entry::destroy_periodic_time(entry, env);
}

/// Called by the host timer wheel when `entry`'s deadline elapses.
pub fn on_host_timer_fire(entry: &alloc::sync::Arc<TimerEntry>, env: &dyn collab::Env) {
    entry::on_host_timer_fire(entry, env);
}

/// Context-switch hooks a vCPU scheduler calls around descheduling `vcpu`
/// (spec §4.4). See `vcpu_set` for the contract of each.
pub fn save_timers(vcpu: &VcpuTimerSet, env: &dyn collab::Env) {
    vcpu_set::save(vcpu, env);
}

pub fn restore_timers(vcpu: &VcpuTimerSet, env: &dyn collab::Env) {
    vcpu_set::restore(vcpu, env);
}

pub fn reset_timers(vcpu: &VcpuTimerSet, env: &dyn collab::Env) {
    vcpu_set::reset(vcpu, env);
}

pub fn migrate_timers(vcpu: &VcpuTimerSet, env: &dyn collab::Env) {
    vcpu_set::migrate(vcpu, env);
}

/// Installs a no-op klog backend so host-run tests that hit a logged path
/// (e.g. the period clamp) don't fall through to the early-boot COM1 port
/// I/O fallback, which isn't valid outside bare metal.
#[cfg(test)]
pub(crate) fn install_test_klog_backend() {
    fn noop(_args: core::fmt::Arguments<'_>) {}
    slopos_lib::klog::klog_register_backend(noop);
}
