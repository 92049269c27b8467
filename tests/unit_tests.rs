//! Unit tests for the kernel core
//!
//! These tests run on the host (not an embedded target) to verify the
//! scheduling, timer, and synchronization algorithms work correctly.

#[cfg(test)]
mod ticket_tests {
    use rtsmp::ticket::TicketMutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let counter = Arc::new(TicketMutex::new(0u64));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*counter.lock(), 40_000);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let mutex = TicketMutex::new(());
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }
}

#[cfg(test)]
mod rbtree_tests {
    use rtsmp::rbtree::{RbNode, RbTree};

    fn less(a: &u64, b: &u64) -> bool {
        a < b
    }

    #[test]
    fn test_minimum_walk_is_sorted() {
        let mut tree = RbTree::new();
        let mut nodes = [RbNode::new(0u64); 12];
        let keys = [31u64, 7, 19, 2, 25, 11, 5, 29, 13, 3, 17, 23];
        for (i, key) in keys.iter().enumerate() {
            nodes[i].key = *key;
            tree.insert(&mut nodes, i as u16, less);
        }

        let mut prev = 0;
        let mut count = 0;
        let mut cur = tree.minimum(&nodes);
        while let Some(i) = cur {
            let key = nodes[i as usize].key;
            assert!(key >= prev, "walk not sorted");
            prev = key;
            count += 1;
            cur = tree.successor(&nodes, i);
        }
        assert_eq!(count, keys.len());
    }

    #[test]
    fn test_postorder_walk_allows_destroy() {
        let mut tree = RbTree::new();
        let mut nodes = [RbNode::new(0u64); 8];
        for i in 0..8u16 {
            nodes[i as usize].key = i as u64;
            tree.insert(&mut nodes, i, less);
        }

        // simulate destroy-while-walking: visit each exactly once without
        // touching already-visited children
        let mut seen = 0u32;
        let mut cur = tree.postorder_first(&nodes);
        while let Some(i) = cur {
            assert_eq!(seen & (1 << i), 0);
            seen |= 1 << i;
            cur = tree.postorder_next(&nodes, i);
        }
        assert_eq!(seen, 0xFF);
    }
}

#[cfg(test)]
mod timer_tests {
    use rtsmp::{
        os_tick_handler, os_timer_arm, os_timer_cancel, os_timer_create, os_timer_del, Kernel,
        OsError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_tick_fires_exactly_due_timers_once() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn routine(_kernel: &Kernel, _arg: usize) {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let timer = os_timer_create(&kernel).unwrap();

        // expire = now + 100
        os_timer_arm(&kernel, timer, 0, 100, routine, 0).unwrap();

        os_tick_handler(&kernel, 0, 50);
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        os_tick_handler(&kernel, 0, 150);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        os_tick_handler(&kernel, 0, 200);
        assert_eq!(HITS.load(Ordering::SeqCst), 1, "timer fired twice");
    }

    #[test]
    fn test_tickle_fires_in_deadline_order() {
        static ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());
        fn routine(_kernel: &Kernel, arg: usize) {
            ORDER.lock().unwrap().push(arg);
        }

        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let a = os_timer_create(&kernel).unwrap();
        let b = os_timer_create(&kernel).unwrap();
        let c = os_timer_create(&kernel).unwrap();

        os_timer_arm(&kernel, a, 0, 30, routine, 30).unwrap();
        os_timer_arm(&kernel, b, 0, 10, routine, 10).unwrap();
        os_timer_arm(&kernel, c, 0, 20, routine, 20).unwrap();

        os_tick_handler(&kernel, 0, 25);
        assert_eq!(*ORDER.lock().unwrap(), vec![10, 20]);

        // the remaining timer is untouched and fires later
        os_tick_handler(&kernel, 0, 30);
        assert_eq!(*ORDER.lock().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_cancel_returns_remaining_ticks() {
        fn routine(_kernel: &Kernel, _arg: usize) {}

        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let timer = os_timer_create(&kernel).unwrap();

        os_timer_arm(&kernel, timer, 0, 100, routine, 0).unwrap();
        os_tick_handler(&kernel, 0, 40); // nothing due; advances the clock
        assert_eq!(os_timer_cancel(&kernel, timer), 60);

        // canceling an inactive timer is a no-op
        assert_eq!(os_timer_cancel(&kernel, timer), 0);
    }

    #[test]
    fn test_routine_may_rearm_itself() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        static TIMER: Mutex<Option<rtsmp::OsTimerId>> = Mutex::new(None);
        fn routine(kernel: &Kernel, _arg: usize) {
            if HITS.fetch_add(1, Ordering::SeqCst) == 0 {
                // the tickle dropped the watchdog lock, so re-arming from
                // inside the routine must not deadlock
                let timer = TIMER.lock().unwrap().unwrap();
                os_timer_arm(kernel, timer, 0, 50, routine, 0).unwrap();
            }
        }

        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let timer = os_timer_create(&kernel).unwrap();
        *TIMER.lock().unwrap() = Some(timer);
        os_timer_arm(&kernel, timer, 0, 100, routine, 0).unwrap();

        os_tick_handler(&kernel, 0, 100);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        // the re-armed instance fires on a later tickle
        os_tick_handler(&kernel, 0, 200);
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timer_pool_exhaustion() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let mut timers = Vec::new();
        loop {
            match os_timer_create(&kernel) {
                Ok(t) => timers.push(t),
                Err(e) => {
                    assert_eq!(e, OsError::TmrNoMoreTmr);
                    break;
                }
            }
        }
        assert_eq!(timers.len(), rtsmp::CFG_TIMER_MAX);

        // freeing a slot makes creation work again
        os_timer_del(&kernel, timers.pop().unwrap()).unwrap();
        assert!(os_timer_create(&kernel).is_ok());
    }
}

#[cfg(test)]
mod sched_tests {
    use rtsmp::{
        os_task_create, os_task_del, os_task_set_prio, os_task_yield, os_tick_handler,
        os_time_dly, Kernel, OsError, OsSchedState,
    };

    #[test]
    fn test_create_fills_processors_then_preempts() {
        let kernel = Kernel::new();
        kernel.init(2).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Scheduled);

        // both processors busy; priority 5 displaces the priority 20 task
        let c = os_task_create(&kernel, "c", 5, 0).unwrap();
        assert_eq!(kernel.task_state(c).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Ready);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);

        // the displaced task's processor was told to dispatch
        assert!(kernel.take_dispatch(0) || kernel.take_dispatch(1));

        // equal priority does not preempt
        let d = os_task_create(&kernel, "d", 10, 0).unwrap();
        assert_eq!(kernel.task_state(d).unwrap(), OsSchedState::Ready);
    }

    #[test]
    fn test_set_prio_flips_ready_and_scheduled() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Ready);

        // raising the ready task above the scheduled one swaps them
        os_task_set_prio(&kernel, b, 5).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Ready);

        // lowering it back swaps again
        os_task_set_prio(&kernel, b, 30).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Ready);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);
    }

    #[test]
    fn test_yield_round_robins_equal_priority() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 10, 0).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);

        let help = os_task_yield(&kernel, a).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Ready);
        assert_eq!(help, Some(a));

        // with only lower-priority tasks ready, yield is a no-op
        os_task_del(&kernel, a).unwrap();
        let c = os_task_create(&kernel, "c", 30, 0).unwrap();
        let help = os_task_yield(&kernel, b).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(c).unwrap(), OsSchedState::Ready);
        assert_eq!(help, None);
    }

    #[test]
    fn test_delete_hands_processor_over() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();
        let c = os_task_create(&kernel, "c", 15, 0).unwrap();

        os_task_del(&kernel, a).unwrap();
        // priority 15 beats 20 for the vacated processor
        assert_eq!(kernel.task_state(c).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Ready);

        // the slot is gone
        assert_eq!(kernel.task_state(a), Err(OsError::TaskInvalid));
    }

    #[test]
    fn test_task_pool_exhaustion() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let mut tasks = Vec::new();
        loop {
            match os_task_create(&kernel, "t", 10, 0) {
                Ok(t) => tasks.push(t),
                Err(e) => {
                    assert_eq!(e, OsError::TaskNoMoreTcb);
                    break;
                }
            }
        }
        assert_eq!(tasks.len(), rtsmp::CFG_TASK_MAX);

        os_task_del(&kernel, tasks.pop().unwrap()).unwrap();
        assert!(os_task_create(&kernel, "t", 10, 0).is_ok());
    }

    #[test]
    fn test_delay_blocks_until_tick() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);

        os_time_dly(&kernel, a, 100).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Scheduled);

        os_tick_handler(&kernel, 0, 50);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);

        os_tick_handler(&kernel, 0, 100);
        // back, and it preempts the lower-priority task
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Scheduled);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Ready);
    }
}

#[cfg(test)]
mod mutex_tests {
    use rtsmp::types::opt;
    use rtsmp::{
        os_task_create, os_task_del, os_task_set_prio, os_tick_handler, Kernel, OsError, OsMutex,
        OsPendStatus, OsSchedState,
    };

    #[test]
    fn test_release_wakes_highest_priority_fifo_ties() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let owner = os_task_create(&kernel, "owner", 5, 0).unwrap();
        let w1 = os_task_create(&kernel, "w1", 20, 0).unwrap();
        let w2 = os_task_create(&kernel, "w2", 10, 0).unwrap();
        let w3 = os_task_create(&kernel, "w3", 10, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, owner, 0, opt::NONE).unwrap();

        mutex.pend(&kernel, w1, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, w2, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, w3, 0, opt::NONE).unwrap();
        for w in [w1, w2, w3] {
            assert_eq!(kernel.task_state(w).unwrap(), OsSchedState::Blocked);
        }

        // highest priority first
        mutex.post(&kernel, owner).unwrap();
        assert_eq!(mutex.owner(), Some(w2));
        assert_ne!(kernel.task_state(w2).unwrap(), OsSchedState::Blocked);

        // FIFO among the equal-priority pair
        mutex.post(&kernel, w2).unwrap();
        assert_eq!(mutex.owner(), Some(w3));

        mutex.post(&kernel, w3).unwrap();
        assert_eq!(mutex.owner(), Some(w1));

        mutex.post(&kernel, w1).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_post_by_non_owner_is_refused() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        assert_eq!(mutex.post(&kernel, b), Err(OsError::MutexNotOwner));
        mutex.post(&kernel, a).unwrap();
    }

    #[test]
    fn test_nesting() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let mutex = OsMutex::new();

        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), Some(a));
        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_non_blocking_attempt() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        assert_eq!(
            mutex.pend(&kernel, b, 0, opt::PEND_NON_BLOCKING),
            Err(OsError::PendWouldBlock)
        );
        assert_ne!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
    }

    /// Task A (priority 5) holds the mutex; task B (priority 2) pends and
    /// blocks; A inherits priority 2; A releases; B owns it and A's
    /// effective priority reverts to 5.
    #[test]
    fn test_priority_inheritance_scenario() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 5, 0).unwrap();
        let b = os_task_create(&kernel, "b", 2, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();

        mutex.pend(&kernel, b, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_effective_prio(a).unwrap(), 2);
        assert_eq!(kernel.task_base_prio(a).unwrap(), 5);

        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), Some(b));
        assert_eq!(kernel.task_effective_prio(a).unwrap(), 5);
        assert_ne!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
    }

    #[test]
    fn test_priority_inheritance_is_transitive() {
        let kernel = Kernel::new();
        kernel.init(2).unwrap();

        let a = os_task_create(&kernel, "a", 30, 0).unwrap();
        let c = os_task_create(&kernel, "c", 40, 1).unwrap();
        let b = os_task_create(&kernel, "b", 2, 0).unwrap();

        let m1 = OsMutex::new();
        let m2 = OsMutex::new();

        // A owns M1 and blocks on M2, which C owns
        m1.pend(&kernel, a, 0, opt::NONE).unwrap();
        m2.pend(&kernel, c, 0, opt::NONE).unwrap();
        m2.pend(&kernel, a, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);

        // B pends on M1: the boost rides the chain through A to C
        m1.pend(&kernel, b, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_effective_prio(a).unwrap(), 2);
        assert_eq!(kernel.task_effective_prio(c).unwrap(), 2);
    }

    #[test]
    fn test_deadlock_cycle_of_two() {
        let kernel = Kernel::new();
        kernel.init(2).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 1).unwrap();

        let m1 = OsMutex::new();
        let m2 = OsMutex::new();

        m1.pend(&kernel, a, 0, opt::NONE).unwrap();
        m2.pend(&kernel, b, 0, opt::NONE).unwrap();

        // B blocks on M1 (fine: A is not blocked)
        m1.pend(&kernel, b, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);

        // A acquiring M2 would close the cycle: refused, not blocked
        assert_eq!(
            m2.pend(&kernel, a, 0, opt::NONE),
            Err(OsError::PendDeadlock)
        );
        assert_ne!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_pend_status(a).unwrap(), OsPendStatus::Deadlock);

        // the refused task can still release what it owns
        m1.post(&kernel, a).unwrap();
        assert_eq!(m1.owner(), Some(b));
    }

    #[test]
    fn test_deadlock_cycle_of_three_and_acyclic_control() {
        let kernel = Kernel::new();
        kernel.init(2).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 1).unwrap();
        let c = os_task_create(&kernel, "c", 30, 0).unwrap();
        let d = os_task_create(&kernel, "d", 40, 1).unwrap();

        let m1 = OsMutex::new();
        let m2 = OsMutex::new();
        let m3 = OsMutex::new();

        m1.pend(&kernel, a, 0, opt::NONE).unwrap();
        m2.pend(&kernel, b, 0, opt::NONE).unwrap();
        m3.pend(&kernel, c, 0, opt::NONE).unwrap();

        m1.pend(&kernel, b, 0, opt::NONE).unwrap(); // B waits for A
        m2.pend(&kernel, c, 0, opt::NONE).unwrap(); // C waits for B

        // A waiting for C closes a length-3 cycle
        assert_eq!(
            m3.pend(&kernel, a, 0, opt::NONE),
            Err(OsError::PendDeadlock)
        );

        // the same shape without the closing edge blocks normally
        m3.pend(&kernel, d, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(d).unwrap(), OsSchedState::Blocked);
    }

    #[test]
    fn test_timeout_is_reported_distinctly() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();

        mutex.pend(&kernel, b, 100, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);

        os_tick_handler(&kernel, 0, 150);
        assert_ne!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_pend_status(b).unwrap(), OsPendStatus::Timeout);

        // the timed-out task is no longer a waiter
        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_set_prio_on_blocked_waiter_reorders_and_propagates() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 5, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();
        let c = os_task_create(&kernel, "c", 10, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, b, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, c, 0, opt::NONE).unwrap();

        // raise the blocked B above C; the owner inherits the new priority
        os_task_set_prio(&kernel, b, 2).unwrap();
        assert_eq!(kernel.task_effective_prio(a).unwrap(), 2);

        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), Some(b));
        assert_eq!(kernel.task_effective_prio(a).unwrap(), 5);
    }

    #[test]
    fn test_pend_abort_resumes_with_abort_status() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, b, 0, opt::NONE).unwrap();

        assert!(rtsmp::os_task_pend_abort(&kernel, b).unwrap());
        assert_ne!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_pend_status(b).unwrap(), OsPendStatus::Abort);

        // aborting a task that is not pending is a no-op
        assert!(!rtsmp::os_task_pend_abort(&kernel, b).unwrap());

        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_delete_of_waiter_is_forced_extract() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 10, 0).unwrap();
        let b = os_task_create(&kernel, "b", 20, 0).unwrap();

        let mutex = OsMutex::new();
        mutex.pend(&kernel, a, 0, opt::NONE).unwrap();
        mutex.pend(&kernel, b, 0, opt::NONE).unwrap();

        os_task_del(&kernel, b).unwrap();

        // the deleted task is not woken by the release
        mutex.post(&kernel, a).unwrap();
        assert_eq!(mutex.owner(), None);
    }
}

#[cfg(test)]
mod sem_tests {
    use rtsmp::types::opt;
    use rtsmp::{os_task_create, os_tick_handler, Kernel, OsError, OsSchedState, OsSem};

    #[test]
    fn test_count_semantics() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let a = os_task_create(&kernel, "a", 10, 0).unwrap();

        let sem = OsSem::new(2);
        assert_eq!(sem.pend(&kernel, a, 0, opt::NONE).unwrap(), 1);
        assert_eq!(sem.pend(&kernel, a, 0, opt::NONE).unwrap(), 0);
        assert_eq!(
            sem.pend(&kernel, a, 0, opt::PEND_NON_BLOCKING),
            Err(OsError::PendWouldBlock)
        );

        assert_eq!(sem.post(&kernel).unwrap(), 1);
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_post_wakes_highest_priority_waiter() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();

        let a = os_task_create(&kernel, "a", 20, 0).unwrap();
        let b = os_task_create(&kernel, "b", 10, 0).unwrap();

        let sem = OsSem::new(0);
        sem.pend(&kernel, a, 0, opt::NONE).unwrap();
        sem.pend(&kernel, b, 0, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);

        // the count goes to the waiter, not the counter
        sem.post(&kernel).unwrap();
        assert_ne!(kernel.task_state(b).unwrap(), OsSchedState::Blocked);
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);
        assert_eq!(sem.count(), 0);

        sem.post(&kernel).unwrap();
        assert_ne!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);
    }

    #[test]
    fn test_sem_timeout() {
        let kernel = Kernel::new();
        kernel.init(1).unwrap();
        let a = os_task_create(&kernel, "a", 10, 0).unwrap();

        let sem = OsSem::new(0);
        sem.pend(&kernel, a, 50, opt::NONE).unwrap();
        assert_eq!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);

        os_tick_handler(&kernel, 0, 60);
        assert_ne!(kernel.task_state(a).unwrap(), OsSchedState::Blocked);

        // a later post finds no waiter and banks the count
        assert_eq!(sem.post(&kernel).unwrap(), 1);
    }
}
