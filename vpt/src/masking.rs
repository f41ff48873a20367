//! MaskingOracle: pure queries over LAPIC/PIC/IOAPIC masking state and vector
//! computation (spec §4.2).
//!
//! These take primitive `(source, irq)` values rather than a [`crate::TimerEntry`]
//! reference, so the [`crate::injector`] can call them while it already holds
//! the owning vCPU's lock, without this module needing any lock of its own.

use crate::collab::IrqController;
use crate::entry::{IntSource, TimerSource};
use crate::vcpu_set::VcpuId;

/// True if `irq` is currently masked from `vcpu`'s point of view.
///
/// A LAPIC-routed entry is masked if the LAPIC itself is disabled, or its
/// LVT timer entry has the mask bit set. An ISA-routed entry is masked only
/// when *both* the PIC's IMR bit is set for the line and the line's IOAPIC
/// redirection entry is also masked — either controller alone willing to
/// accept the line is enough to deliver it.
pub fn is_masked(ctrl: &dyn IrqController, vcpu: VcpuId, source: TimerSource, irq: u8) -> bool {
    match source {
        TimerSource::Lapic => {
            !ctrl.lapic_enabled(vcpu) || ctrl.lapic_lvt_timer_masked(vcpu)
        }
        TimerSource::Isa => {
            let gsi = ctrl.isa_irq_to_gsi(irq);
            let pic_masked =
                ctrl.pic_imr_masked(vcpu, irq) || !ctrl.accepts_pic_interrupts(vcpu);
            pic_masked && ctrl.ioapic_redirection_masked(vcpu, gsi)
        }
    }
}

/// The vector that would be delivered for `irq` if it fired right now.
///
/// For a LAPIC-routed entry, `irq` already *is* the vector. For an ISA-routed
/// entry, the vector depends on which controller is acknowledging:
/// PIC-acknowledged interrupts use the 8259's programmed vector base plus the
/// line's offset within its controller; IOAPIC-acknowledged interrupts use
/// the redirection table's own vector field.
pub fn vector(
    ctrl: &dyn IrqController,
    vcpu: VcpuId,
    source: TimerSource,
    irq: u8,
    ack_source: IntSource,
) -> u8 {
    match source {
        TimerSource::Lapic => irq,
        TimerSource::Isa => match ack_source {
            IntSource::Pic => ctrl.pic_vector_base(vcpu, irq) + (irq & 7),
            IntSource::Lapic => {
                let gsi = ctrl.isa_irq_to_gsi(irq);
                ctrl.ioapic_redirection_vector(vcpu, gsi)
            }
        },
    }
}
