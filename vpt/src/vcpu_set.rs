//! `VcpuTimerSet`: the per-vCPU collection of timer entries, and the
//! context-switch hooks (`save`/`restore`/`reset`/`migrate`) that run around
//! descheduling (spec §4.4).

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::collab::Env;
use crate::entry::EntryState;
use crate::policy::{self, TickPolicy};

/// Identifies a vCPU to the collaborator traits. Opaque to this crate beyond
/// equality; the embedding hypervisor assigns these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VcpuId(pub u32);

pub(crate) struct SetInner {
    pub(crate) entries: Vec<EntryState>,
}

/// An insertion-ordered collection of `TimerEntry` state, protected by one
/// lock. At most one entry per emulated device is expected, enforced by
/// callers (device models), not by this type.
pub struct VcpuTimerSet {
    id: VcpuId,
    processor: AtomicU32,
    pub(crate) inner: Mutex<SetInner>,
    /// Guest-time snapshot taken by `save` under `DelayForMissedTicks`,
    /// written back by the next `restore`. Zero means "no snapshot pending".
    guest_time_snapshot: AtomicU64,
}

impl VcpuTimerSet {
    pub fn new(id: VcpuId, processor: u32) -> alloc::sync::Arc<VcpuTimerSet> {
        alloc::sync::Arc::new(VcpuTimerSet {
            id,
            processor: AtomicU32::new(processor),
            inner: Mutex::new(SetInner {
                entries: Vec::new(),
            }),
            guest_time_snapshot: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> VcpuId {
        self.id
    }

    pub fn processor(&self) -> u32 {
        self.processor.load(Ordering::Relaxed)
    }
}

/// `pt_save` (spec §4.4): if `v` is blocked, no-op. Otherwise, under lock,
/// stop every entry's host timer unless it asked to keep running
/// (`do_not_freeze`), then snapshot guest time under `DelayForMissedTicks`.
pub fn save(set: &VcpuTimerSet, env: &dyn Env) {
    if env.sched().is_blocked(set.id()) {
        return;
    }

    let inner = set.inner.lock();
    for state in inner.entries.iter() {
        if !state.do_not_freeze {
            if let Some(h) = state.host_timer {
                env.timers().stop_timer(h);
            }
        }
    }

    if env.mode().mode(set.id()) == TickPolicy::DelayForMissedTicks {
        set.guest_time_snapshot
            .store(env.clock().guest_time_now(set.id()), Ordering::Relaxed);
    }
}

/// `pt_restore` (spec §4.4): under lock, run missed-tick processing and
/// re-arm every entry; then, under `DelayForMissedTicks`, write back any
/// snapshot `save` took and clear it.
pub fn restore(set: &VcpuTimerSet, env: &dyn Env) {
    let policy = env.mode().mode(set.id());
    let now = env.clock().now_ns();

    {
        let mut inner = set.inner.lock();
        for state in inner.entries.iter_mut() {
            policy::process_missed_ticks(policy, state, now);
            if let Some(h) = state.host_timer {
                env.timers().set_timer(h, state.scheduled_ns);
            }
        }
    }

    if policy == TickPolicy::DelayForMissedTicks {
        let snapshot = set.guest_time_snapshot.swap(0, Ordering::Relaxed);
        if snapshot != 0 {
            env.clock().set_guest_time(set.id(), snapshot);
        }
    }
}

/// `pt_reset` (spec §4.4): under lock, clear pending state and reschedule
/// every entry from `now`.
pub fn reset(set: &VcpuTimerSet, env: &dyn Env) {
    let now = env.clock().now_ns();
    let guest_time = env.clock().guest_time_now(set.id());

    let mut inner = set.inner.lock();
    for state in inner.entries.iter_mut() {
        state.pending_intr_nr = 0;
        state.last_plt_gtime = guest_time;
        state.scheduled_ns = now.saturating_add(state.period_ns);
        if let Some(h) = state.host_timer {
            env.timers().set_timer(h, state.scheduled_ns);
        }
    }
    drop(inner);
    slopos_lib::klog_debug!("vpt: reset vcpu {:?}", set.id().0);
}

/// `pt_migrate` (spec §4.4): under lock, rebind each `host_timer` to
/// `v.processor`.
pub fn migrate(set: &VcpuTimerSet, env: &dyn Env) {
    let cpu = env.sched().processor(set.id());
    set.processor.store(cpu, Ordering::Relaxed);

    let inner = set.inner.lock();
    for state in inner.entries.iter() {
        if let Some(h) = state.host_timer {
            env.timers().migrate_timer(h, cpu);
        }
    }
    drop(inner);
    slopos_lib::klog_debug!("vpt: migrated vcpu {:?} to processor {}", set.id().0, cpu);
}
