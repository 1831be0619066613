//! Integration tests exercising end-to-end scenarios (S1–S7) against
//! `machine::sim::SimMachine`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eduos::config;
use eduos::error::KernelError;
use eduos::machine::sim::SimMachine;
use eduos::machine::Machine;
use eduos::runtime::trap::{dispatch, SysCall, SysResult};

fn test_machine() -> Arc<SimMachine> {
    let _ = env_logger::try_init();
    SimMachine::for_tests()
}

/// S1 — bootstrap & single child: init forks a pri-3 child that falls off
/// the end of its entry (an implicit `quit(0)`); init reaps it and halts 0.
#[test]
fn s1_bootstrap_and_single_child() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        kernel
            .table
            .fork("testcase_main", 3, config::MIN_STACK, || {})
            .unwrap();
        let waited = dispatch(&kernel, SysCall::Wait);
        assert!(matches!(waited, SysResult::Wait(Ok((_, 0)))));
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}

/// S2 — join returns dead children in quit order, then errors once both
/// have been reaped.
#[test]
fn s2_join_returns_dead_children_then_errors() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        let k1 = kernel.clone();
        kernel
            .table
            .fork("child_a", 3, config::MIN_STACK, move || {
                k1.table.terminate(7);
            })
            .unwrap();
        let k2 = kernel.clone();
        kernel
            .table
            .fork("child_b", 3, config::MIN_STACK, move || {
                k2.table.terminate(8);
            })
            .unwrap();

        let mut statuses = vec![];
        for _ in 0..2 {
            match dispatch(&kernel, SysCall::Wait) {
                SysResult::Wait(Ok((_, status))) => statuses.push(status),
                other => panic!("expected a reaped child, got {other:?}"),
            }
        }
        statuses.sort_unstable();
        assert_eq!(statuses, vec![7, 8]);

        assert!(matches!(
            dispatch(&kernel, SysCall::Wait),
            SysResult::Wait(Err(KernelError::NoChildren))
        ));
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}

/// S3 — join blocks until a sleeping child quits, then returns its status.
#[test]
fn s3_join_blocks_until_child_quits() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        let k2 = kernel.clone();
        kernel
            .table
            .fork("sleeper", 4, config::MIN_STACK, move || {
                let _ = dispatch(&k2, SysCall::Sleep { seconds: 1 });
                k2.table.terminate(42);
            })
            .unwrap();
        let waited = dispatch(&kernel, SysCall::Wait);
        assert!(matches!(waited, SysResult::Wait(Ok((_, 42)))));
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}

/// S4 — zap rendezvous: A zaps B and blocks until B observes a shared
/// flag and quits; A only resumes afterward. B repeatedly sleeps (a
/// genuine kernel blocking call, handing the CPU back to the table)
/// rather than busy-spinning, so A's `zap` call actually lands while B
/// is still alive instead of racing a child that preempts A outright.
#[test]
fn s4_zap_rendezvous() {
    let machine = test_machine();
    let flag = Arc::new(AtomicBool::new(false));
    let flag_for_setter = flag.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(15));
        flag_for_setter.store(true, Ordering::SeqCst);
    });

    let zap_returned = Arc::new(AtomicBool::new(false));
    let zap_returned_for_check = zap_returned.clone();

    eduos::boot(machine.clone(), move |kernel| {
        let flag_for_b = flag.clone();
        let k_for_b = kernel.clone();
        let b_pid = kernel
            .table
            .fork("b", 4, config::MIN_STACK, move || {
                while !flag_for_b.load(Ordering::SeqCst) {
                    let _ = dispatch(&k_for_b, SysCall::Sleep { seconds: 0 });
                }
            })
            .unwrap();

        kernel.table.zap(b_pid).unwrap();
        zap_returned.store(true, Ordering::SeqCst);
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
    assert!(zap_returned_for_check.load(Ordering::SeqCst));
}

/// S5 — semaphore mutual exclusion: four workers each increment a shared
/// counter 1000 times under a binary semaphore; the final count is exact.
#[test]
fn s5_semaphore_mutual_exclusion() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        let created = dispatch(&kernel, SysCall::SemCreate { initial: 1 });
        let handle = match created {
            SysResult::SemCreate(Ok(h)) => h,
            _ => panic!("expected a semaphore handle"),
        };

        let counter = Arc::new(AtomicU32::new(0));
        let remaining = Arc::new(AtomicU32::new(4));

        for i in 0..4 {
            let k = kernel.clone();
            let counter = counter.clone();
            let remaining = remaining.clone();
            k.clone()
                .table
                .fork(&format!("worker_{i}"), 3, config::MIN_STACK, move || {
                    for _ in 0..1000 {
                        assert!(matches!(
                            dispatch(&k, SysCall::SemP { handle }),
                            SysResult::SemP(Ok(()))
                        ));
                        counter.fetch_add(1, Ordering::SeqCst);
                        assert!(matches!(
                            dispatch(&k, SysCall::SemV { handle }),
                            SysResult::SemV(Ok(()))
                        ));
                    }
                    remaining.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        for _ in 0..4 {
            assert!(matches!(dispatch(&kernel, SysCall::Wait), SysResult::Wait(Ok(_))));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4000);
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}

/// S6 — terminal line read: bytes injected on unit 0 assemble into one
/// line delivered whole to `termRead`.
#[test]
fn s6_terminal_line_read() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        let m2 = kernel.table.machine().clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            for &byte in b"hi\n" {
                m2.inject_terminal_input(0, byte).unwrap();
            }
        });

        let read = dispatch(
            &kernel,
            SysCall::TermRead {
                unit: 0,
                max_len: 10,
            },
        );
        match read {
            SysResult::TermRead(Ok(bytes)) => assert_eq!(&bytes, b"hi\n"),
            other => panic!("expected a line, got {other:?}"),
        }
        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}

/// S7 — disk write/read round-trip across two blocks, and an out-of-range
/// track reported as a device error rather than a panic.
#[test]
fn s7_disk_write_read_round_trip() {
    let machine = test_machine();
    eduos::boot(machine.clone(), |kernel| {
        let size = dispatch(&kernel, SysCall::DiskSize { unit: 0 });
        let (sector_bytes, blocks_per_track, total_tracks) = match size {
            SysResult::DiskSize(Ok(geom)) => geom,
            other => panic!("expected disk geometry, got {other:?}"),
        };
        assert_eq!(sector_bytes, config::DISK_SECTOR_SIZE as u32);
        assert_eq!(blocks_per_track, config::BLOCKS_PER_TRACK as u32);

        let pattern: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        let written = dispatch(
            &kernel,
            SysCall::DiskWrite {
                unit: 0,
                track: 1,
                first_block: 2,
                data: pattern.clone(),
            },
        );
        assert!(matches!(written, SysResult::DiskWrite(Ok(1024))));

        let read = dispatch(
            &kernel,
            SysCall::DiskRead {
                unit: 0,
                track: 1,
                first_block: 2,
                num_blocks: 2,
            },
        );
        match read {
            SysResult::DiskRead(Ok(bytes)) => assert_eq!(bytes, pattern),
            other => panic!("expected the written pattern back, got {other:?}"),
        }

        let past_geometry = dispatch(
            &kernel,
            SysCall::DiskRead {
                unit: 0,
                track: total_tracks,
                first_block: 0,
                num_blocks: 1,
            },
        );
        assert!(matches!(past_geometry, SysResult::DiskRead(Err(_))));

        kernel.table.machine().halt(0);
    });
    assert_eq!(machine.wait_for_halt(), 0);
}
