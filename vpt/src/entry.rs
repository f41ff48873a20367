//! `TimerEntry`: one periodic/one-shot timer and its firing state (spec §3,
//! §4.3).
//!
//! An entry is split into two parts. [`TimerEntry`] is the *handle* a device
//! model holds: stable across the entry's whole life, cheap to read without
//! the big per-vCPU lock. [`EntryState`] is the mutable state — scheduling,
//! pending count, callback, host timer handle — and lives inside the owning
//! [`crate::vcpu_set::VcpuTimerSet`], reachable only while that vCPU's lock
//! is held (spec invariant 5).
//!
//! The link between the two is `TimerEntry::owner`: a small, independently
//! locked `Option<Arc<VcpuTimerSet>>` read *before* the big lock is taken.
//! This is the Rust shape of "entry.vcpu" from the source: a pointer, read
//! racily, then re-verified once the real lock is held. Re-verification is
//! needed because destroy is the one path allowed to clear `owner` without
//! holding the big lock throughout (spec invariant 5(a)).

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::collab::{Env, HostTimerHandle};
use crate::policy;
use crate::vcpu_set::VcpuTimerSet;

/// Which interrupt-controller path an entry is routed through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerSource {
    /// Per-vCPU local APIC timer; `irq` is already a vector.
    Lapic,
    /// Legacy ISA line (PIT/RTC), routed through the PIC and/or IOAPIC.
    Isa,
}

/// Which controller actually delivered (and is acknowledging) an interrupt.
/// An `Isa` entry can be acknowledged via either path depending on how the
/// guest has the line routed at ack time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntSource {
    Pic,
    Lapic,
}

/// The guest's acknowledgement of a vector, passed to [`crate::intr_post`].
#[derive(Clone, Copy, Debug)]
pub struct IntAck {
    pub vector: u8,
    pub source: IntSource,
}

/// Acknowledgement callback: invoked outside the lock after `intr_post`
/// updates pending/ack state. May re-enter the timer API (e.g. an RTC
/// re-arming itself with a new period).
pub type AckCallback = Arc<dyn Fn(&Arc<VcpuTimerSet>) + Send + Sync>;

/// Parameters to [`crate::create_periodic_time`].
pub struct CreateParams {
    pub source: TimerSource,
    /// LAPIC vector, or ISA line number, depending on `source`.
    pub irq: u8,
    /// Nominal period in nanoseconds; ignored (treated as 0) if `one_shot`.
    pub period_ns: u64,
    pub one_shot: bool,
    pub cb: Option<AckCallback>,
}

/// Mutable firing/scheduling state, living inside the owning
/// `VcpuTimerSet`'s lock.
pub struct EntryState {
    pub(crate) id: u64,
    pub(crate) source: TimerSource,
    pub(crate) irq: u8,
    pub(crate) period_ns: u64,
    pub(crate) period_cycles: u64,
    pub(crate) one_shot: bool,
    pub(crate) scheduled_ns: u64,
    pub(crate) pending_intr_nr: u32,
    pub(crate) last_plt_gtime: u64,
    pub(crate) irq_issued: bool,
    pub(crate) do_not_freeze: bool,
    pub(crate) on_list: bool,
    pub(crate) cb: Option<AckCallback>,
    pub(crate) host_timer: Option<HostTimerHandle>,
}

#[cfg(test)]
impl EntryState {
    /// Zeroed state for unit tests that only exercise [`crate::policy`]
    /// functions directly.
    pub(crate) fn new_for_test() -> Self {
        EntryState {
            id: 0,
            source: TimerSource::Isa,
            irq: 0,
            period_ns: 0,
            period_cycles: 0,
            one_shot: false,
            scheduled_ns: 0,
            pending_intr_nr: 0,
            last_plt_gtime: 0,
            irq_issued: false,
            do_not_freeze: false,
            on_list: false,
            cb: None,
            host_timer: None,
        }
    }
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// The stable handle a device model owns for the life of one timer.
pub struct TimerEntry {
    pub(crate) id: u64,
    /// "entry.vcpu" — read without the big lock, then re-verified once it is
    /// held. `None` until the first `create_periodic_time`, and again after
    /// `destroy_periodic_time`.
    pub(crate) owner: Mutex<Option<Arc<VcpuTimerSet>>>,
}

impl TimerEntry {
    pub fn new() -> Arc<TimerEntry> {
        Arc::new(TimerEntry {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            owner: Mutex::new(None),
        })
    }

    /// Snapshot of the owning vCPU, if any. Racy by design (spec §5): callers
    /// that need a consistent view must go through
    /// [`with_owner_state_locked`].
    pub fn owner_snapshot(&self) -> Option<Arc<VcpuTimerSet>> {
        self.owner.lock().clone()
    }
}

/// The stable-vCPU locking protocol (spec §4.3 step 1, §5): read
/// `entry.vcpu`, lock its set, re-check `entry.vcpu` is still the same
/// `Arc`, retry if not. Returns `None` if the entry is not currently owned by
/// any vCPU, or was delisted out from under a concurrent caller.
///
/// `f` runs with the owning set's lock held and a mutable reference to the
/// entry's live `EntryState`.
pub(crate) fn with_owner_state_locked<R>(
    entry: &TimerEntry,
    f: impl FnOnce(&Arc<VcpuTimerSet>, &mut EntryState) -> R,
) -> Option<R> {
    loop {
        let candidate = entry.owner.lock().clone()?;
        let mut inner = candidate.inner.lock();
        let still_owner = matches!(&*entry.owner.lock(), Some(s) if Arc::ptr_eq(s, &candidate));
        if !still_owner {
            continue;
        }
        return match inner.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(state) => Some(f(&candidate, state)),
            None => None,
        };
    }
}

/// `create_periodic_time` (spec §4.3).
pub fn create_periodic_time(
    vcpu: &Arc<VcpuTimerSet>,
    entry: &Arc<TimerEntry>,
    params: CreateParams,
    env: &dyn Env,
) {
    destroy_periodic_time(entry, env);

    let now = env.clock().now_ns();
    let vcpu_id = vcpu.id();

    let mut period_ns = params.period_ns;
    if !params.one_shot && period_ns < crate::MIN_PERIODIC_PERIOD_NS {
        slopos_lib::klog_warn!(
            "vpt: periodic period {}ns below minimum, clamping to {}ns",
            period_ns,
            crate::MIN_PERIODIC_PERIOD_NS
        );
        period_ns = crate::MIN_PERIODIC_PERIOD_NS;
    }

    let period_cycles = if params.one_shot {
        0
    } else {
        let cpu_khz = env.clock().cpu_khz(vcpu_id) as u128;
        (period_ns as u128 * cpu_khz / 1_000_000) as u64
    };

    let mut scheduled_ns = now.saturating_add(period_ns);
    if matches!(params.source, TimerSource::Lapic) {
        // Offset LAPIC ticks from other timer ticks so a guest using LAPIC
        // ticks for process accounting doesn't misattribute interrupt
        // processing time.
        scheduled_ns = scheduled_ns.saturating_add(period_ns / 2);
    }

    let processor = env.sched().processor(vcpu_id);
    let host_timer = env.timers().init_timer(vcpu_id, processor);

    *entry.owner.lock() = Some(vcpu.clone());
    {
        let mut inner = vcpu.inner.lock();
        inner.entries.push(EntryState {
            id: entry.id,
            source: params.source,
            irq: params.irq,
            period_ns: if params.one_shot { 0 } else { period_ns },
            period_cycles,
            one_shot: params.one_shot,
            scheduled_ns,
            pending_intr_nr: 0,
            last_plt_gtime: env.clock().guest_time_now(vcpu_id),
            irq_issued: false,
            do_not_freeze: false,
            on_list: true,
            cb: params.cb,
            host_timer: Some(host_timer),
        });
        // Arm while still holding the set's lock, matching the source.
        env.timers().set_timer(host_timer, scheduled_ns);
    }

    slopos_lib::klog_debug!(
        "vpt: created entry {} on vcpu {:?} (source {:?}, irq {}, period {}ns)",
        entry.id,
        vcpu_id.0,
        params.source,
        params.irq,
        period_ns
    );
}

/// `destroy_periodic_time` (spec §4.3). No-op if `entry` was never created,
/// or already destroyed.
pub fn destroy_periodic_time(entry: &Arc<TimerEntry>, env: &dyn Env) {
    let host_timer = loop {
        let Some(owner) = entry.owner.lock().clone() else {
            return;
        };
        let mut inner = owner.inner.lock();
        let still_owner = matches!(&*entry.owner.lock(), Some(s) if Arc::ptr_eq(s, &owner));
        if !still_owner {
            continue;
        }
        let host_timer = match inner.entries.iter().position(|e| e.id == entry.id) {
            Some(idx) => {
                let state = &mut inner.entries[idx];
                state.on_list = false;
                let host_timer = state.host_timer.take();
                inner.entries.remove(idx);
                host_timer
            }
            None => None,
        };
        drop(inner);
        *entry.owner.lock() = None;
        break host_timer;
    };

    slopos_lib::klog_debug!("vpt: destroyed entry {}", entry.id);

    // Outside the lock: cancel the host timer and wait for any in-flight
    // callback. Doing this under the lock would deadlock against a callback
    // already spinning to acquire it.
    if let Some(handle) = host_timer {
        env.timers().kill_timer(handle);
    }
}

/// Host-timer callback (spec §4.3). The host timer wheel invokes this when
/// `entry`'s deadline elapses.
///
/// Called unconditionally with the stable-vcpu protocol; if the entry has
/// been destroyed (or re-homed) since arming, this is a silent no-op — the
/// caller's responsibility to not re-arm in that case is already satisfied
/// by destroy having quiesced the callback before release.
pub fn on_host_timer_fire(entry: &Arc<TimerEntry>, env: &dyn Env) {
    let now = env.clock().now_ns();
    // Re-arm and kick happen here, still under the owning set's lock,
    // matching the source: vcpu_kick before unlock is what makes a lost
    // wake-up impossible (spec §7).
    with_owner_state_locked(entry, |owner, state| {
        state.pending_intr_nr = state.pending_intr_nr.saturating_add(1);
        slopos_lib::klog_trace!(
            "vpt: entry {} fired, pending_intr_nr={}",
            entry.id,
            state.pending_intr_nr
        );
        if !state.one_shot {
            state.scheduled_ns = state.scheduled_ns.saturating_add(state.period_ns);
            let policy = env.mode().mode(owner.id());
            policy::process_missed_ticks(policy, state, now);
            if let Some(handle) = state.host_timer {
                env.timers().set_timer(handle, state.scheduled_ns);
            }
        }
        env.sched().vcpu_kick(owner.id());
    });
}
