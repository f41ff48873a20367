//! External collaborators consumed by the core (spec §6).
//!
//! The source this crate is modeled on reaches hardware through a global
//! function-pointer registry (see `slopos_lib::pcr`'s `register_lapic_id_fn` /
//! `register_send_ipi_to_cpu_fn`) — appropriate when there is exactly one
//! physical machine underneath. A hypervisor process hosts many guests at
//! once, and tests want many independent fakes side by side, so the same
//! call-out shape is expressed here as traits instead of a singleton table.
//!
//! [`Env`] bundles the five collaborator seams named in spec §6 into one
//! handle, the same way this workspace's own service-table types bundle many
//! services behind one handle — callers pass a single `&dyn Env` rather than
//! five separate trait objects.

use crate::policy::TickPolicy;
use crate::vcpu_set::VcpuId;

/// Opaque handle into the host timer wheel. Meaningless to this crate beyond
/// equality and being passed back to the same [`HostTimerWheel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostTimerHandle(pub u64);

/// The host timer wheel: arms, disarms, rebinds and quiesces per-entry
/// one-shot alarms. Firing is reported back into the core via
/// [`crate::on_host_timer_fire`] — this trait only covers the outbound half.
pub trait HostTimerWheel {
    /// Allocate a timer slot pinned to `cpu`, not yet armed.
    fn init_timer(&self, vcpu: VcpuId, cpu: u32) -> HostTimerHandle;

    /// (Re-)arm `timer` to fire at `deadline_ns` host-monotonic time.
    fn set_timer(&self, timer: HostTimerHandle, deadline_ns: u64);

    /// Disarm `timer` without releasing its slot.
    fn stop_timer(&self, timer: HostTimerHandle);

    /// Rebind `timer` to run on `cpu` from now on.
    fn migrate_timer(&self, timer: HostTimerHandle, cpu: u32);

    /// Disarm `timer` and release its slot, blocking until any in-flight
    /// callback on `timer` has returned. Must not be called while holding
    /// the entry's lock (the callback may be spinning to acquire it).
    fn kill_timer(&self, timer: HostTimerHandle);
}

/// Host and guest monotonic clocks.
pub trait GuestClock {
    /// Host-monotonic time, in nanoseconds (`NOW()`).
    fn now_ns(&self) -> u64;

    /// The guest-visible clock reading for `vcpu`.
    fn guest_time_now(&self, vcpu: VcpuId) -> u64;

    /// Overwrite the guest-visible clock for `vcpu`.
    fn set_guest_time(&self, vcpu: VcpuId, t: u64);

    /// Guest TSC frequency in kHz, used to convert host-time periods into
    /// `period_cycles`.
    fn cpu_khz(&self, vcpu: VcpuId) -> u64;
}

/// LAPIC/PIC/IOAPIC masking and vector queries, plus the raise/assert/deassert
/// entry points the Injector uses outside the lock.
pub trait IrqController {
    fn lapic_enabled(&self, vcpu: VcpuId) -> bool;
    fn lapic_lvt_timer_masked(&self, vcpu: VcpuId) -> bool;

    /// Edge-raise `vector` on `vcpu`'s LAPIC.
    fn raise_lapic_irq(&self, vcpu: VcpuId, vector: u8);

    /// PIC IMR bit for `isa_irq` (true = masked).
    fn pic_imr_masked(&self, vcpu: VcpuId, isa_irq: u8) -> bool;

    /// Whether the vCPU is currently willing to accept PIC-routed interrupts
    /// at all (`vlapic_accept_pic_intr`).
    fn accepts_pic_interrupts(&self, vcpu: VcpuId) -> bool;

    /// PIC vector base for the 8259 owning `isa_irq` (master or slave).
    fn pic_vector_base(&self, vcpu: VcpuId, isa_irq: u8) -> u8;

    /// Legacy ISA IRQ to IOAPIC global system interrupt number.
    fn isa_irq_to_gsi(&self, isa_irq: u8) -> u32;

    /// IOAPIC redirection-table mask bit for `gsi`.
    fn ioapic_redirection_masked(&self, vcpu: VcpuId, gsi: u32) -> bool;

    /// IOAPIC redirection-table vector field for `gsi`.
    fn ioapic_redirection_vector(&self, vcpu: VcpuId, gsi: u32) -> u8;

    fn isa_irq_assert(&self, vcpu: VcpuId, isa_irq: u8);
    fn isa_irq_deassert(&self, vcpu: VcpuId, isa_irq: u8);
}

/// vCPU scheduling queries the core needs for kick/block/migrate.
pub trait VcpuScheduler {
    /// Wake `vcpu` out of idle/blocked so it observes a pending interrupt.
    fn vcpu_kick(&self, vcpu: VcpuId);

    /// True if `vcpu` is currently blocked (not runnable).
    fn is_blocked(&self, vcpu: VcpuId) -> bool;

    /// Host CPU `vcpu` is currently pinned/scheduled to.
    fn processor(&self, vcpu: VcpuId) -> u32;
}

/// Per-guest tick-delivery mode selector (spec §4.1), read on every decision
/// point. A racy atomic load is acceptable: mode changes are administrative.
pub trait TimerModeSource {
    fn mode(&self, vcpu: VcpuId) -> TickPolicy;
}

/// Bundles the four collaborator traits above into the single handle the
/// rest of the crate threads through its API.
pub trait Env {
    fn timers(&self) -> &dyn HostTimerWheel;
    fn clock(&self) -> &dyn GuestClock;
    fn irq(&self) -> &dyn IrqController;
    fn sched(&self) -> &dyn VcpuScheduler;
    fn mode(&self) -> &dyn TimerModeSource;
}
