//! The four tick-delivery policies (spec §4.1) and the shared missed-tick
//! algorithm they gate.

use crate::entry::EntryState;

/// Per-guest tick-delivery mode. Selected once per guest and re-read on every
/// decision point; see [`crate::collab::TimerModeSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickPolicy {
    /// Freeze guest time across a save/restore cycle instead of accumulating
    /// missed ticks; catch-up is expressed as a guest-time jump on ack.
    DelayForMissedTicks,
    /// Collapse genuinely-new backlog into a `do_not_freeze` flag instead of
    /// a pending count, so a freshly-restored idle timer doesn't report any
    /// missed ticks at all.
    NoMissedTicksPending,
    /// Accumulate pending ticks normally, but collapse them all into a single
    /// acknowledgement.
    OneMissedTickPending,
    /// No special handling: ordinary missed-tick accumulation and ack.
    Default,
}

/// `pt_process_missed_ticks`: called with two different pre-conditions by its
/// two call sites (see module docs on [`crate::entry::on_host_timer_fire`]
/// and [`crate::vcpu_set::restore`]) — this function itself does not care
/// which, it only looks at `entry.scheduled_ns` and `entry.pending_intr_nr`
/// as they stand when called.
///
/// Computes `missed = now - scheduled`; if not positive, returns without
/// changing anything. Otherwise advances `scheduled` by `ticks * period`,
/// and either bumps `pending_intr_nr` by `ticks` or, under
/// `NoMissedTicksPending`, sets `do_not_freeze` to whether there was no prior
/// pending tick — leaving `pending_intr_nr` itself untouched.
pub fn process_missed_ticks(policy: TickPolicy, state: &mut EntryState, now_ns: u64) {
    let missed = now_ns as i64 - state.scheduled_ns as i64;
    if missed <= 0 {
        return;
    }
    let period = state.period_ns.max(1);
    let ticks = missed as u64 / period + 1;

    if policy == TickPolicy::NoMissedTicksPending {
        state.do_not_freeze = state.pending_intr_nr == 0;
    } else {
        state.pending_intr_nr = state.pending_intr_nr.saturating_add(ticks as u32);
    }
    state.scheduled_ns = state.scheduled_ns.saturating_add(ticks * period);
}

/// Per-policy adjustment applied on acknowledgement (spec §4.5 step 3),
/// for periodic entries only (one-shot handling is the caller's job).
pub fn on_acknowledge(policy: TickPolicy, state: &mut EntryState, guest_time_now: u64) {
    if policy == TickPolicy::OneMissedTickPending {
        state.pending_intr_nr = 0;
        state.last_plt_gtime = guest_time_now;
    } else {
        state.pending_intr_nr = state.pending_intr_nr.saturating_sub(1);
        state.last_plt_gtime = state.last_plt_gtime.saturating_add(state.period_cycles);
    }
}
