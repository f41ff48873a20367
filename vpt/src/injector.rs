//! Injector: picks the next interrupt to raise and processes the guest's
//! acknowledgement of one already delivered (spec §4.5).

extern crate alloc;

use alloc::sync::Arc;

use crate::collab::Env;
use crate::entry::{IntAck, TimerSource};
use crate::masking;
use crate::policy;
use crate::vcpu_set::VcpuTimerSet;

/// `pt_update_irq`: among `set`'s entries with a pending tick, not already
/// issued, and not currently masked, picks the one that would fall furthest
/// behind if skipped — minimal `last_plt_gtime + period_cycles` — marks it
/// issued, and raises its IRQ.
///
/// The raise itself happens after the lock is released — asserting an ISA
/// line or the LAPIC can re-enter this crate (e.g. a masked-then-unmasked
/// LAPIC immediately re-triggering `update_irq`), which must not deadlock
/// against the lock this function just held.
pub fn update_irq(set: &Arc<VcpuTimerSet>, env: &dyn Env) {
    let vcpu = set.id();

    let picked = {
        let inner = set.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.pending_intr_nr > 0 && !e.irq_issued)
            .filter(|e| !masking::is_masked(env.irq(), vcpu, e.source, e.irq))
            .min_by_key(|e| e.last_plt_gtime.saturating_add(e.period_cycles))
            .map(|e| (e.id, e.source, e.irq))
    };

    let Some((id, source, irq)) = picked else {
        return;
    };

    {
        let mut inner = set.inner.lock();
        if let Some(state) = inner.entries.iter_mut().find(|e| e.id == id) {
            state.irq_issued = true;
        }
    }

    slopos_lib::klog_trace!("vpt: issuing entry {} (irq {}) on vcpu {:?}", id, irq, vcpu.0);

    match source {
        TimerSource::Lapic => env.irq().raise_lapic_irq(vcpu, irq),
        TimerSource::Isa => {
            // Edge-triggered: deassert then assert so a guest that never saw
            // the line drop still observes a rising edge.
            env.irq().isa_irq_deassert(vcpu, irq);
            env.irq().isa_irq_assert(vcpu, irq);
        }
    }
}

/// `pt_intr_post`: finds the entry matching `ack` (by vector and source), and
/// if found, clears `irq_issued`, delists one-shot entries, applies the
/// policy-specific pending/ack-time update, and — outside the lock — invokes
/// the entry's acknowledgement callback.
pub fn intr_post(set: &Arc<VcpuTimerSet>, ack: IntAck, env: &dyn Env) {
    let vcpu = set.id();
    let policy = env.mode().mode(vcpu);

    let cb = {
        let mut inner = set.inner.lock();
        let Some(idx) = inner.entries.iter().position(|e| {
            e.pending_intr_nr > 0
                && e.irq_issued
                && masking::vector(env.irq(), vcpu, e.source, e.irq, ack.source) == ack.vector
        }) else {
            return;
        };

        let state = &mut inner.entries[idx];
        state.irq_issued = false;
        state.do_not_freeze = false;

        if state.one_shot {
            state.on_list = false;
            let cb = state.cb.clone();
            inner.entries.remove(idx);
            cb
        } else {
            let guest_time_now = env.clock().guest_time_now(vcpu);
            policy::on_acknowledge(policy, state, guest_time_now);

            if policy == crate::TickPolicy::DelayForMissedTicks
                && guest_time_now < state.last_plt_gtime
            {
                env.clock().set_guest_time(vcpu, state.last_plt_gtime);
            }

            state.cb.clone()
        }
    };

    slopos_lib::klog_trace!("vpt: acknowledged vector {} on vcpu {:?}", ack.vector, vcpu.0);

    if let Some(cb) = cb {
        cb(set);
    }
}
