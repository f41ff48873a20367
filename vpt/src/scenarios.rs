//! Named tests for the six literal scenarios and the concurrency race this
//! crate is built to survive. Each test below corresponds to one scenario.

extern crate alloc;

use crate::collab::{
    Env, GuestClock, HostTimerHandle, HostTimerWheel, IrqController, TimerModeSource,
    VcpuScheduler,
};
use crate::entry::{CreateParams, IntAck, IntSource, TimerEntry, TimerSource};
use crate::policy::TickPolicy;
use crate::vcpu_set::{VcpuId, VcpuTimerSet};
use core::cell::{Cell, RefCell};

struct FakeTimers {
    armed: RefCell<alloc::vec::Vec<(HostTimerHandle, u64)>>,
    stopped: RefCell<alloc::vec::Vec<HostTimerHandle>>,
}
impl Default for FakeTimers {
    fn default() -> Self {
        FakeTimers {
            armed: RefCell::new(alloc::vec::Vec::new()),
            stopped: RefCell::new(alloc::vec::Vec::new()),
        }
    }
}
impl HostTimerWheel for FakeTimers {
    fn init_timer(&self, _vcpu: VcpuId, _cpu: u32) -> HostTimerHandle {
        HostTimerHandle(1)
    }
    fn set_timer(&self, timer: HostTimerHandle, deadline_ns: u64) {
        self.armed.borrow_mut().push((timer, deadline_ns));
    }
    fn stop_timer(&self, timer: HostTimerHandle) {
        self.stopped.borrow_mut().push(timer);
    }
    fn migrate_timer(&self, _timer: HostTimerHandle, _cpu: u32) {}
    fn kill_timer(&self, _timer: HostTimerHandle) {}
}

struct FakeClock {
    now: Cell<u64>,
    guest_time: Cell<u64>,
}
impl GuestClock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.get()
    }
    fn guest_time_now(&self, _vcpu: VcpuId) -> u64 {
        self.guest_time.get()
    }
    fn set_guest_time(&self, _vcpu: VcpuId, t: u64) {
        self.guest_time.set(t);
    }
    fn cpu_khz(&self, _vcpu: VcpuId) -> u64 {
        1_000_000
    }
}

struct FakeIrq {
    asserts: RefCell<alloc::vec::Vec<u8>>,
    deasserts: RefCell<alloc::vec::Vec<u8>>,
}
impl Default for FakeIrq {
    fn default() -> Self {
        FakeIrq {
            asserts: RefCell::new(alloc::vec::Vec::new()),
            deasserts: RefCell::new(alloc::vec::Vec::new()),
        }
    }
}
impl IrqController for FakeIrq {
    fn lapic_enabled(&self, _vcpu: VcpuId) -> bool {
        true
    }
    fn lapic_lvt_timer_masked(&self, _vcpu: VcpuId) -> bool {
        false
    }
    fn raise_lapic_irq(&self, _vcpu: VcpuId, _vector: u8) {}
    fn pic_imr_masked(&self, _vcpu: VcpuId, _isa_irq: u8) -> bool {
        false
    }
    fn accepts_pic_interrupts(&self, _vcpu: VcpuId) -> bool {
        true
    }
    fn pic_vector_base(&self, _vcpu: VcpuId, _isa_irq: u8) -> u8 {
        0x20
    }
    fn isa_irq_to_gsi(&self, isa_irq: u8) -> u32 {
        isa_irq as u32
    }
    fn ioapic_redirection_masked(&self, _vcpu: VcpuId, _gsi: u32) -> bool {
        false
    }
    fn ioapic_redirection_vector(&self, _vcpu: VcpuId, _gsi: u32) -> u8 {
        0x40
    }
    fn isa_irq_assert(&self, _vcpu: VcpuId, isa_irq: u8) {
        self.asserts.borrow_mut().push(isa_irq);
    }
    fn isa_irq_deassert(&self, _vcpu: VcpuId, isa_irq: u8) {
        self.deasserts.borrow_mut().push(isa_irq);
    }
}

struct FakeSched {
    blocked: Cell<bool>,
}
impl VcpuScheduler for FakeSched {
    fn vcpu_kick(&self, _vcpu: VcpuId) {}
    fn is_blocked(&self, _vcpu: VcpuId) -> bool {
        self.blocked.get()
    }
    fn processor(&self, _vcpu: VcpuId) -> u32 {
        0
    }
}

struct FakeMode(Cell<TickPolicy>);
impl TimerModeSource for FakeMode {
    fn mode(&self, _vcpu: VcpuId) -> TickPolicy {
        self.0.get()
    }
}

struct FakeEnv {
    timers: FakeTimers,
    clock: FakeClock,
    irq: FakeIrq,
    sched: FakeSched,
    mode: FakeMode,
}
impl Env for FakeEnv {
    fn timers(&self) -> &dyn HostTimerWheel {
        &self.timers
    }
    fn clock(&self) -> &dyn GuestClock {
        &self.clock
    }
    fn irq(&self) -> &dyn IrqController {
        &self.irq
    }
    fn sched(&self) -> &dyn VcpuScheduler {
        &self.sched
    }
    fn mode(&self) -> &dyn TimerModeSource {
        &self.mode
    }
}

fn env(policy: TickPolicy) -> FakeEnv {
    FakeEnv {
        timers: FakeTimers::default(),
        clock: FakeClock {
            now: Cell::new(0),
            guest_time: Cell::new(0),
        },
        irq: FakeIrq::default(),
        sched: FakeSched {
            blocked: Cell::new(false),
        },
        mode: FakeMode(Cell::new(policy)),
    }
}

#[test]
fn basic_periodic_scenario() {
    crate::install_test_klog_backend();
    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let entry = TimerEntry::new();
    let e = env(TickPolicy::Default);

    crate::entry::create_periodic_time(
        &set,
        &entry,
        CreateParams {
            source: TimerSource::Isa,
            irq: 0,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &e,
    );

    for _ in 0..10 {
        let now = e.clock.now.get() + 1_000_000;
        e.clock.now.set(now);
        crate::entry::on_host_timer_fire(&entry, &e);
        crate::injector::update_irq(&set, &e);
        crate::injector::intr_post(
            &set,
            IntAck {
                vector: 0x20, // pic_vector_base(0x20) + (irq(0) & 7)
                source: IntSource::Pic,
            },
            &e,
        );
    }

    assert_eq!(e.irq.asserts.borrow().len(), 10);
    assert_eq!(e.irq.deasserts.borrow().len(), 10);
    // One arm from create_periodic_time, one re-arm per fire.
    assert_eq!(e.timers.armed.borrow().len(), 11);
    let inner = set.inner.lock();
    assert_eq!(inner.entries[0].pending_intr_nr, 0);
    assert_eq!(inner.entries[0].last_plt_gtime, 10 * inner.entries[0].period_cycles);
}

#[test]
fn missed_tick_collapsing_scenario() {
    crate::install_test_klog_backend();
    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let entry = TimerEntry::new();
    let e = env(TickPolicy::OneMissedTickPending);

    crate::entry::create_periodic_time(
        &set,
        &entry,
        CreateParams {
            source: TimerSource::Lapic,
            irq: 0xef,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &e,
    );

    // vCPU descheduled in a way that still runs timers: fire 5 times with no
    // intervening acks.
    for _ in 0..5 {
        let now = e.clock.now.get() + 1_000_000;
        e.clock.now.set(now);
        crate::entry::on_host_timer_fire(&entry, &e);
    }

    assert_eq!(set.inner.lock().entries[0].pending_intr_nr, 5);

    crate::injector::update_irq(&set, &e);
    crate::injector::intr_post(
        &set,
        IntAck {
            vector: 0xef,
            source: IntSource::Lapic,
        },
        &e,
    );

    let inner = set.inner.lock();
    assert_eq!(inner.entries[0].pending_intr_nr, 0);
    assert_eq!(inner.entries[0].last_plt_gtime, e.clock.guest_time.get());
}

#[test]
fn no_missed_ticks_pending_freeze_scenario() {
    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let entry = TimerEntry::new();
    let e = env(TickPolicy::NoMissedTicksPending);

    crate::entry::create_periodic_time(
        &set,
        &entry,
        CreateParams {
            source: TimerSource::Isa,
            irq: 2,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &e,
    );

    // Descheduled at t=0 before the timer ever fires.
    crate::vcpu_set::save(&set, &e);
    assert_eq!(e.timers.stopped.borrow().len(), 1);

    // Restored at t=1.5ms.
    e.clock.now.set(1_500_000);
    crate::vcpu_set::restore(&set, &e);

    let inner = set.inner.lock();
    assert_eq!(inner.entries[0].pending_intr_nr, 0);
    assert!(inner.entries[0].do_not_freeze);
    assert_eq!(inner.entries[0].scheduled_ns, 2_000_000);
    drop(inner);

    // A subsequent save leaves this entry's timer running.
    crate::vcpu_set::save(&set, &e);
    assert_eq!(e.timers.stopped.borrow().len(), 1);
}

#[test]
fn delay_for_missed_ticks_time_rewind_prevention_scenario() {
    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let entry = TimerEntry::new();
    let e = env(TickPolicy::DelayForMissedTicks);
    e.clock.guest_time.set(100);

    {
        let mut s = crate::entry::EntryState::new_for_test();
        s.id = entry.id;
        s.source = TimerSource::Lapic;
        s.irq = 0xef;
        s.period_cycles = 100;
        s.last_plt_gtime = 50; // + period_cycles(100) on ack -> 150
        s.irq_issued = true;
        set.inner.lock().entries.push(s);
    }
    *entry.owner.lock() = Some(set.clone());

    crate::injector::intr_post(
        &set,
        IntAck {
            vector: 0xef,
            source: IntSource::Lapic,
        },
        &e,
    );

    assert_eq!(set.inner.lock().entries[0].last_plt_gtime, 150);
    assert!(e.clock.guest_time.get() >= 150);
}

#[test]
fn lapic_offset_scenario() {
    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let lapic_entry = TimerEntry::new();
    let isa_entry = TimerEntry::new();
    let e = env(TickPolicy::Default);

    crate::entry::create_periodic_time(
        &set,
        &lapic_entry,
        CreateParams {
            source: TimerSource::Lapic,
            irq: 0xef,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &e,
    );
    crate::entry::create_periodic_time(
        &set,
        &isa_entry,
        CreateParams {
            source: TimerSource::Isa,
            irq: 0,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &e,
    );

    let inner = set.inner.lock();
    let lapic = inner.entries.iter().find(|s| s.id == lapic_entry.id).unwrap();
    let isa = inner.entries.iter().find(|s| s.id == isa_entry.id).unwrap();
    assert_eq!(lapic.scheduled_ns, isa.scheduled_ns + 500_000);
}

#[test]
fn destroy_during_fire_scenario() {
    use std::sync::{Arc as StdArc, Barrier};
    use std::thread;

    struct BlockingTimers {
        inside: StdArc<Barrier>,
        proceed: StdArc<Barrier>,
    }
    impl HostTimerWheel for BlockingTimers {
        fn init_timer(&self, _vcpu: VcpuId, _cpu: u32) -> HostTimerHandle {
            HostTimerHandle(1)
        }
        fn set_timer(&self, _timer: HostTimerHandle, _deadline_ns: u64) {
            // Signal we're holding the set's lock, then sit here until the
            // test says destroy has had a chance to block on it.
            self.inside.wait();
            self.proceed.wait();
        }
        fn stop_timer(&self, _timer: HostTimerHandle) {}
        fn migrate_timer(&self, _timer: HostTimerHandle, _cpu: u32) {}
        fn kill_timer(&self, _timer: HostTimerHandle) {}
    }

    struct BlockingEnv {
        timers: BlockingTimers,
        clock: FakeClock,
        irq: FakeIrq,
        sched: FakeSched,
        mode: FakeMode,
    }
    impl Env for BlockingEnv {
        fn timers(&self) -> &dyn HostTimerWheel {
            &self.timers
        }
        fn clock(&self) -> &dyn GuestClock {
            &self.clock
        }
        fn irq(&self) -> &dyn IrqController {
            &self.irq
        }
        fn sched(&self) -> &dyn VcpuScheduler {
            &self.sched
        }
        fn mode(&self) -> &dyn TimerModeSource {
            &self.mode
        }
    }

    let set = VcpuTimerSet::new(VcpuId(0), 0);
    let entry = TimerEntry::new();
    let setup_env = env(TickPolicy::Default);

    crate::entry::create_periodic_time(
        &set,
        &entry,
        CreateParams {
            source: TimerSource::Lapic,
            irq: 0xef,
            period_ns: 1_000_000,
            one_shot: false,
            cb: None,
        },
        &setup_env,
    );

    let inside = StdArc::new(Barrier::new(2));
    let proceed = StdArc::new(Barrier::new(2));
    let blocking_env = StdArc::new(BlockingEnv {
        timers: BlockingTimers {
            inside: inside.clone(),
            proceed: proceed.clone(),
        },
        clock: FakeClock {
            now: Cell::new(0),
            guest_time: Cell::new(0),
        },
        irq: FakeIrq::default(),
        sched: FakeSched {
            blocked: Cell::new(false),
        },
        mode: FakeMode(Cell::new(TickPolicy::Default)),
    });

    let fire_entry = entry.clone();
    let fire_env = blocking_env.clone();
    let handle_a = thread::spawn(move || {
        crate::entry::on_host_timer_fire(&fire_entry, &*fire_env);
    });

    // Wait until thread A is inside the set's lock (blocked in set_timer).
    inside.wait();

    let destroy_entry = entry.clone();
    let destroy_env = blocking_env.clone();
    let handle_b = thread::spawn(move || {
        crate::entry::destroy_periodic_time(&destroy_entry, &*destroy_env);
    });

    // Give B a chance to reach the lock and genuinely block on it.
    thread::sleep(std::time::Duration::from_millis(20));

    // Let A finish; B's destroy can now proceed.
    proceed.wait();

    handle_a.join().unwrap();
    handle_b.join().unwrap();

    assert!(entry.owner_snapshot().is_none());
    assert!(set.inner.lock().entries.is_empty());
}
