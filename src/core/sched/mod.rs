//! SMP scheduler core
//!
//! One scheduler instance covering every configured processor. All
//! scheduler-visible task state (node state, priority copy, processor
//! assignment, ready-queue linkage) lives inside [`SchedCore`], so the
//! single scheduler ticket lock guards the whole structure.
//!
//! The ready queue is one ordered tree holding every READY and SCHEDULED
//! node, keyed by `(priority << 32) | seq`. Two sequence counters give
//! head/tail placement among equal priorities: tail keys grow, head keys
//! shrink, and key comparison stays a plain `<`.

use crate::config::{CFG_CPU_MAX, CFG_TASK_MAX};
use crate::rbtree::{RbNode, RbTree};
use crate::types::{OsCpu, OsPlacement, OsPrio, OsSchedState, OsTaskId};

/// Result of a scheduler operation.
///
/// `needs_help` names a task that lost (or failed to win) a processor and
/// must be actively rescheduled by the caller, e.g. by sending an
/// inter-processor event. `dispatch_cpus` is a bitmask of processors whose
/// scheduled task changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedOutcome {
    pub needs_help: Option<OsTaskId>,
    pub dispatch_cpus: u32,
}

impl SchedOutcome {
    pub const fn none() -> Self {
        SchedOutcome {
            needs_help: None,
            dispatch_cpus: 0,
        }
    }

    fn dispatch_one(cpu: OsCpu) -> Self {
        SchedOutcome {
            needs_help: None,
            dispatch_cpus: 1 << cpu,
        }
    }
}

/// Per-task scheduler bookkeeping
#[derive(Debug, Clone, Copy)]
struct SchedNode {
    state: OsSchedState,
    prio: OsPrio,
    cpu: Option<OsCpu>,
}

impl SchedNode {
    const INIT: SchedNode = SchedNode {
        state: OsSchedState::Blocked,
        prio: 0,
        cpu: None,
    };
}

/// Scheduler instance state, guarded by the kernel's scheduler lock
pub(crate) struct SchedCore {
    ready: RbTree,
    rb: [RbNode<u64>; CFG_TASK_MAX],
    nodes: [SchedNode; CFG_TASK_MAX],
    scheduled: [Option<OsTaskId>; CFG_CPU_MAX],
    cpu_count: usize,
    seq_front: u32,
    seq_back: u32,
}

const SEQ_MID: u32 = 1 << 31;

impl SchedCore {
    pub(crate) const fn new() -> Self {
        SchedCore {
            ready: RbTree::new(),
            rb: [RbNode::zeroed(); CFG_TASK_MAX],
            nodes: [SchedNode::INIT; CFG_TASK_MAX],
            scheduled: [None; CFG_CPU_MAX],
            cpu_count: CFG_CPU_MAX,
            seq_front: SEQ_MID,
            seq_back: SEQ_MID,
        }
    }

    pub(crate) fn init(&mut self, cpu_count: usize) {
        debug_assert!(cpu_count >= 1 && cpu_count <= CFG_CPU_MAX);
        *self = Self::new();
        self.cpu_count = cpu_count;
    }

    // ============ Queries ============

    #[inline]
    pub(crate) fn state(&self, task: OsTaskId) -> OsSchedState {
        self.nodes[task.index()].state
    }

    #[inline]
    pub(crate) fn assigned_cpu(&self, task: OsTaskId) -> Option<OsCpu> {
        self.nodes[task.index()].cpu
    }

    #[inline]
    pub(crate) fn scheduled_on(&self, cpu: OsCpu) -> Option<OsTaskId> {
        self.scheduled[cpu as usize]
    }

    // ============ Node lifecycle ============

    /// Initialize the node for a freshly created task. The node starts
    /// blocked and off the ready tree.
    pub(crate) fn node_init(&mut self, task: OsTaskId, prio: OsPrio) {
        debug_assert!(!self.rb[task.index()].is_linked());
        self.nodes[task.index()] = SchedNode {
            state: OsSchedState::Blocked,
            prio,
            cpu: None,
        };
    }

    // ============ Internals ============

    fn key_for(&mut self, prio: OsPrio, placement: OsPlacement) -> u64 {
        let seq = match placement {
            OsPlacement::Tail => {
                let s = self.seq_back;
                self.seq_back = self.seq_back.wrapping_add(1);
                s
            }
            OsPlacement::Head => {
                self.seq_front = self.seq_front.wrapping_sub(1);
                self.seq_front
            }
        };
        ((prio as u64) << 32) | seq as u64
    }

    fn insert_ready(&mut self, task: OsTaskId, placement: OsPlacement) {
        let prio = self.nodes[task.index()].prio;
        let key = self.key_for(prio, placement);
        self.rb[task.index()].key = key;
        self.ready.insert(&mut self.rb, task.0, |a, b| a < b);
        self.nodes[task.index()].state = OsSchedState::Ready;
        self.nodes[task.index()].cpu = None;
    }

    fn assign(&mut self, task: OsTaskId, cpu: OsCpu) {
        self.nodes[task.index()].state = OsSchedState::Scheduled;
        self.nodes[task.index()].cpu = Some(cpu);
        self.scheduled[cpu as usize] = Some(task);
    }

    fn idle_cpu(&self) -> Option<OsCpu> {
        (0..self.cpu_count).find(|&c| self.scheduled[c].is_none()).map(|c| c as OsCpu)
    }

    /// The scheduled node with the numerically largest key, i.e. the one
    /// a higher-priority newcomer should displace.
    fn lowest_scheduled(&self) -> Option<(OsCpu, OsTaskId)> {
        let mut worst: Option<(OsCpu, OsTaskId)> = None;
        for c in 0..self.cpu_count {
            if let Some(t) = self.scheduled[c] {
                let beat = match worst {
                    None => true,
                    Some((_, w)) => self.rb[t.index()].key > self.rb[w.index()].key,
                };
                if beat {
                    worst = Some((c as OsCpu, t));
                }
            }
        }
        worst
    }

    /// The best node in the ready tree that is not currently scheduled.
    fn highest_ready(&self) -> Option<OsTaskId> {
        let mut cur = self.ready.minimum(&self.rb);
        while let Some(i) = cur {
            if self.nodes[i as usize].state == OsSchedState::Ready {
                return Some(OsTaskId(i));
            }
            cur = self.ready.successor(&self.rb, i);
        }
        None
    }

    /// Re-evaluate a SCHEDULED node after its key changed: the highest
    /// READY node may now deserve the processor instead.
    fn finish_scheduled(&mut self, task: OsTaskId) -> SchedOutcome {
        let cpu = self.nodes[task.index()].cpu.expect("scheduled node without a processor");
        if let Some(best) = self.highest_ready() {
            if self.rb[best.index()].key < self.rb[task.index()].key {
                self.nodes[task.index()].state = OsSchedState::Ready;
                self.nodes[task.index()].cpu = None;
                self.assign(best, cpu);
                return SchedOutcome {
                    needs_help: Some(task),
                    dispatch_cpus: 1 << cpu,
                };
            }
        }
        SchedOutcome::none()
    }

    // ============ Operations ============

    /// BLOCKED → READY or SCHEDULED, by comparison against the lowest
    /// scheduled node. A displaced node becomes READY and needs help.
    pub(crate) fn enqueue(&mut self, task: OsTaskId, placement: OsPlacement) -> SchedOutcome {
        debug_assert_eq!(self.nodes[task.index()].state, OsSchedState::Blocked);
        self.insert_ready(task, placement);

        if let Some(cpu) = self.idle_cpu() {
            self.assign(task, cpu);
            return SchedOutcome::dispatch_one(cpu);
        }

        let (vcpu, victim) = self.lowest_scheduled().expect("no processors configured");
        if self.rb[task.index()].key < self.rb[victim.index()].key {
            self.nodes[victim.index()].state = OsSchedState::Ready;
            self.nodes[victim.index()].cpu = None;
            self.assign(task, vcpu);
            SchedOutcome {
                needs_help: Some(victim),
                dispatch_cpus: 1 << vcpu,
            }
        } else {
            SchedOutcome::none()
        }
    }

    /// BLOCKED → READY or SCHEDULED on wakeup; same rule as enqueue.
    #[inline]
    pub(crate) fn unblock(&mut self, task: OsTaskId) -> SchedOutcome {
        self.enqueue(task, OsPlacement::Tail)
    }

    /// SCHEDULED or READY → BLOCKED. A vacated processor is handed the
    /// highest READY node.
    pub(crate) fn block(&mut self, task: OsTaskId) -> SchedOutcome {
        let idx = task.index();
        match self.nodes[idx].state {
            OsSchedState::Blocked => SchedOutcome::none(),
            OsSchedState::Ready => {
                self.ready.extract(&mut self.rb, task.0);
                self.nodes[idx].state = OsSchedState::Blocked;
                SchedOutcome::none()
            }
            OsSchedState::Scheduled => {
                let cpu = self.nodes[idx].cpu.expect("scheduled node without a processor");
                self.ready.extract(&mut self.rb, task.0);
                self.nodes[idx].state = OsSchedState::Blocked;
                self.nodes[idx].cpu = None;
                self.scheduled[cpu as usize] = None;
                if let Some(next) = self.highest_ready() {
                    self.assign(next, cpu);
                }
                SchedOutcome::dispatch_one(cpu)
            }
        }
    }

    /// Re-position the node by a new priority, flipping SCHEDULED↔READY
    /// exactly as enqueue would.
    pub(crate) fn update_priority(
        &mut self,
        task: OsTaskId,
        new_prio: OsPrio,
        placement: OsPlacement,
    ) -> SchedOutcome {
        let idx = task.index();
        self.nodes[idx].prio = new_prio;
        match self.nodes[idx].state {
            OsSchedState::Blocked => SchedOutcome::none(),
            OsSchedState::Ready => {
                self.ready.extract(&mut self.rb, task.0);
                self.nodes[idx].state = OsSchedState::Blocked;
                self.enqueue(task, placement)
            }
            OsSchedState::Scheduled => {
                let cpu = self.nodes[idx].cpu.expect("scheduled node without a processor");
                self.ready.extract(&mut self.rb, task.0);
                self.insert_ready(task, placement);
                self.nodes[idx].state = OsSchedState::Scheduled;
                self.nodes[idx].cpu = Some(cpu);
                self.finish_scheduled(task)
            }
        }
    }

    /// Hand the processor to an equal-or-higher READY node, if any.
    pub(crate) fn yield_cpu(&mut self, task: OsTaskId) -> SchedOutcome {
        let idx = task.index();
        if self.nodes[idx].state != OsSchedState::Scheduled {
            return SchedOutcome::none();
        }
        let cpu = self.nodes[idx].cpu.expect("scheduled node without a processor");
        self.ready.extract(&mut self.rb, task.0);
        self.insert_ready(task, OsPlacement::Tail);
        self.nodes[idx].state = OsSchedState::Scheduled;
        self.nodes[idx].cpu = Some(cpu);
        self.finish_scheduled(task)
    }

    /// Remove the node entirely (task deletion).
    pub(crate) fn node_destroy(&mut self, task: OsTaskId) -> SchedOutcome {
        let outcome = self.block(task);
        debug_assert!(!self.rb[task.index()].is_linked());
        outcome
    }
}
