//! Cooperative scheduler.
//!
//! The process list owns every process of a world, arena-indexed by
//! process id, and keeps a priority-ordered run queue. `World::run`
//! repeatedly picks the first runnable process of a started group and
//! steps its VM until it leaves the `Running` state; when the last
//! non-terminal member of a group settles, the group's finish signal
//! fires exactly once with the final state of the group's principal
//! process.
//!
//! There is no preemption and no asynchronous cancellation: a waiting
//! process is cancelled cooperatively by continuing it with a failure,
//! which raises at the suspension point.

use ahash::AHashMap;

use crate::{
    error::Error,
    process::{Process, ProcessState},
    world::World,
};

/// Process identifier; stable for the process lifetime.
pub type ProcessId = u32;
/// Process group identifier.
pub type ProcessGroupId = u32;

/// Signal handler invoked when a process group finishes.
pub type GroupFinishHandler = Box<dyn FnMut(ProcessGroupId, ProcessState)>;

#[derive(Debug)]
struct GroupInfo {
    principal: ProcessId,
    started: bool,
    finished: bool,
    /// Number of external waits referencing the group. Terminated
    /// members stay around for inspection while this is non-zero.
    waits: u32,
}

/// The ordered set of processes of one world.
#[derive(Default)]
pub struct ProcessList {
    slots: Vec<Option<Process>>,
    /// Run queue: process ids sorted by priority, stable.
    order: Vec<ProcessId>,
    groups: AHashMap<ProcessGroupId, GroupInfo>,
    next_group: ProcessGroupId,
    finish_handler: Option<GroupFinishHandler>,
}

impl ProcessList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a process in `Suspended` state and queues it by priority.
    pub fn create_process(&mut self, name: impl Into<String>, priority: i32) -> ProcessId {
        let process_id = self.slots.len() as ProcessId;
        let process = Process::new(name, process_id, priority);
        self.slots.push(Some(process));
        self.insert_ordered(process_id, priority);
        process_id
    }

    /// Allocates a fresh process group id.
    pub fn allocate_process_group(&mut self) -> ProcessGroupId {
        let group = self.next_group;
        self.next_group += 1;
        group
    }

    /// Borrows a process.
    #[must_use]
    pub fn get(&self, process_id: ProcessId) -> Option<&Process> {
        self.slots.get(process_id as usize)?.as_ref()
    }

    /// Borrows a process mutably.
    pub fn get_mut(&mut self, process_id: ProcessId) -> Option<&mut Process> {
        self.slots.get_mut(process_id as usize)?.as_mut()
    }

    /// Number of live processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True when no process exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes a suspended process runnable within a group.
    pub fn resume_process(
        &mut self,
        process_id: ProcessId,
        group: ProcessGroupId,
    ) -> Result<(), Error> {
        let process = self
            .get_mut(process_id)
            .ok_or_else(|| Error::internal("unknown process"))?;
        if process.state() != ProcessState::Suspended {
            return Err(Error::internal("process is not suspended"));
        }
        process.set_group(group);
        process.set_state(ProcessState::Runnable);
        self.groups.entry(group).or_insert(GroupInfo {
            principal: process_id,
            started: false,
            finished: false,
            waits: 0,
        });
        Ok(())
    }

    /// Makes a group eligible for scheduling.
    pub fn start_process_group(&mut self, group: ProcessGroupId) {
        if let Some(info) = self.groups.get_mut(&group) {
            info.started = true;
            info.finished = false;
        }
    }

    /// Continues a waiting or stopped process.
    pub fn continue_process(&mut self, process_id: ProcessId) -> Result<(), Error> {
        let process = self
            .get_mut(process_id)
            .ok_or_else(|| Error::internal("unknown process"))?;
        match process.state() {
            ProcessState::Waiting | ProcessState::Suspended => {
                process.set_state(ProcessState::Runnable);
                if let Some(group) = process.group() {
                    self.start_process_group(group);
                }
                Ok(())
            }
            _ => Err(Error::internal("process is not waiting")),
        }
    }

    /// Continues a waiting process by raising an error at its suspension
    /// point. This is the cooperative cancellation primitive.
    pub fn continue_process_with_failure(
        &mut self,
        process_id: ProcessId,
        error: Error,
    ) -> Result<(), Error> {
        {
            let process = self
                .get_mut(process_id)
                .ok_or_else(|| Error::internal("unknown process"))?;
            process.set_pending_error(error);
        }
        self.continue_process(process_id)
    }

    /// Moves a process into another group.
    pub fn join_process(
        &mut self,
        process_id: ProcessId,
        target: ProcessGroupId,
    ) -> Result<(), Error> {
        let process = self
            .get_mut(process_id)
            .ok_or_else(|| Error::internal("unknown process"))?;
        process.set_group(target);
        self.groups.entry(target).or_insert(GroupInfo {
            principal: process_id,
            started: false,
            finished: false,
            waits: 0,
        });
        Ok(())
    }

    /// Detaches a process into a fresh group of its own.
    pub fn detach_process(&mut self, process_id: ProcessId) -> Result<ProcessGroupId, Error> {
        let group = self.allocate_process_group();
        self.join_process(process_id, group)?;
        self.start_process_group(group);
        Ok(group)
    }

    /// Re-queues a process after a priority change.
    pub fn set_process_priority(&mut self, process_id: ProcessId, priority: i32) {
        if let Some(process) = self.get_mut(process_id) {
            process.set_priority(priority);
            self.order.retain(|&pid| pid != process_id);
            self.insert_ordered(process_id, priority);
        }
    }

    /// Registers an external wait on a group: its terminated members are
    /// kept for inspection until the wait is removed.
    pub fn add_group_wait(&mut self, group: ProcessGroupId) {
        if let Some(info) = self.groups.get_mut(&group) {
            info.waits += 1;
        }
    }

    /// Removes an external wait on a group.
    pub fn remove_group_wait(&mut self, group: ProcessGroupId) {
        if let Some(info) = self.groups.get_mut(&group) {
            info.waits = info.waits.saturating_sub(1);
        }
    }

    /// Installs the group finish signal handler.
    pub fn on_process_group_finish(&mut self, handler: GroupFinishHandler) {
        self.finish_handler = Some(handler);
    }

    /// Removes processes in terminal states, but only when no external
    /// wait references their group.
    ///
    /// Returns the removed ids so the world can release their resources.
    pub fn remove_terminated_processes(&mut self) -> Vec<ProcessId> {
        let mut removed = Vec::new();
        for slot in &mut self.slots {
            let Some(process) = slot else { continue };
            if !process.state().is_terminal() {
                continue;
            }
            let waited = process
                .group()
                .and_then(|group| self.groups.get(&group))
                .is_some_and(|info| info.waits > 0);
            if !waited {
                removed.push(process.process_id());
                *slot = None;
            }
        }
        self.order.retain(|pid| !removed.contains(pid));
        removed
    }

    /// The first runnable process of a started group, in priority order.
    pub(crate) fn next_runnable(&self) -> Option<ProcessId> {
        self.order.iter().copied().find(|&pid| {
            self.get(pid).is_some_and(|process| {
                process.state() == ProcessState::Runnable
                    && process
                        .group()
                        .and_then(|group| self.groups.get(&group))
                        .is_some_and(|info| info.started)
            })
        })
    }

    /// Takes a process out of its slot for the duration of a run.
    pub(crate) fn take(&mut self, process_id: ProcessId) -> Option<Process> {
        self.slots.get_mut(process_id as usize)?.take()
    }

    /// Returns a process to its slot.
    pub(crate) fn put_back(&mut self, process: Process) {
        let index = process.process_id() as usize;
        self.slots[index] = Some(process);
    }

    /// True when a group has no member left that could still run.
    fn group_settled(&self, group: ProcessGroupId) -> bool {
        !self.slots.iter().flatten().any(|process| {
            process.group() == Some(group)
                && matches!(
                    process.state(),
                    ProcessState::Runnable | ProcessState::Running | ProcessState::Waiting
                )
        })
    }

    /// Marks a settled group finished; returns the principal's final
    /// state when the signal should fire.
    fn finish_group(&mut self, group: ProcessGroupId) -> Option<ProcessState> {
        if !self.group_settled(group) {
            return None;
        }
        let principal = {
            let info = self.groups.get_mut(&group)?;
            if info.finished || !info.started {
                return None;
            }
            info.finished = true;
            info.started = false;
            info.principal
        };
        let state = self
            .get(principal)
            .map_or(ProcessState::Terminated, Process::state);
        Some(state)
    }

    fn insert_ordered(&mut self, process_id: ProcessId, priority: i32) {
        let position = self
            .order
            .iter()
            .position(|&other| {
                self.get(other)
                    .is_some_and(|process| process.priority() > priority)
            })
            .unwrap_or(self.order.len());
        self.order.insert(position, process_id);
    }
}

impl std::fmt::Debug for ProcessList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessList")
            .field("processes", &self.len())
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl World {
    /// Runs all runnable processes of started groups to quiescence.
    ///
    /// Each pick runs one process until it suspends, waits, or reaches a
    /// terminal state; switches happen only at those points. Group
    /// finish signals fire from here, after the group's last member has
    /// settled.
    pub fn run(&mut self) {
        while let Some(process_id) = self.process_list.next_runnable() {
            let Some(mut process) = self.process_list.take(process_id) else {
                break;
            };
            process.run(self);

            if process.state().is_terminal() {
                if let Some(error) = process.error() {
                    let mut logged = error.clone();
                    logged.add_trace(format!("in process \"{}\"", process.name()));
                    self.log_error(&logged);
                }
                if let Some(finalizer) = process.take_finalizer() {
                    if let Err(error) = finalizer(&process) {
                        self.log_error(&error);
                    }
                }
            }

            let group = process.group();
            self.process_list.put_back(process);

            if let Some(group) = group {
                // `finish_group` reports a settled group exactly once
                if let Some(state) = self.process_list.finish_group(group) {
                    if let Some(mut handler) = self.process_list.finish_handler.take() {
                        handler(group, state);
                        if self.process_list.finish_handler.is_none() {
                            self.process_list.finish_handler = Some(handler);
                        }
                    }
                }
            }
        }
    }

    /// Removes terminal processes nobody waits for and releases their
    /// locks.
    pub fn remove_terminated_processes(&mut self) {
        let removed = self.process_list.remove_terminated_processes();
        for process_id in removed {
            self.mutexes_disown(process_id);
        }
    }

    fn mutexes_disown(&mut self, process_id: ProcessId) {
        self.mutex_list_mut().disown_process(process_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_suspended() {
        let mut list = ProcessList::new();
        let pid = list.create_process("t", 50);
        assert_eq!(list.get(pid).unwrap().state(), ProcessState::Suspended);
        assert_eq!(list.get(pid).unwrap().name(), "t");
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut list = ProcessList::new();
        let a = list.create_process("a", 50);
        let b = list.create_process("b", 10);
        let c = list.create_process("c", 50);
        assert_eq!(list.order, vec![b, a, c]);

        list.set_process_priority(a, 5);
        assert_eq!(list.order, vec![a, b, c]);
    }

    #[test]
    fn test_resume_requires_suspended() {
        let mut list = ProcessList::new();
        let pid = list.create_process("t", 50);
        let group = list.allocate_process_group();
        list.resume_process(pid, group).unwrap();
        assert_eq!(list.get(pid).unwrap().state(), ProcessState::Runnable);
        assert!(list.resume_process(pid, group).is_err());
    }

    #[test]
    fn test_next_runnable_needs_started_group() {
        let mut list = ProcessList::new();
        let pid = list.create_process("t", 50);
        let group = list.allocate_process_group();
        list.resume_process(pid, group).unwrap();
        assert_eq!(list.next_runnable(), None);
        list.start_process_group(group);
        assert_eq!(list.next_runnable(), Some(pid));
    }

    #[test]
    fn test_remove_terminated_respects_waits() {
        let mut list = ProcessList::new();
        let pid = list.create_process("t", 50);
        let group = list.allocate_process_group();
        list.resume_process(pid, group).unwrap();
        list.get_mut(pid).unwrap().set_state(ProcessState::Ended);

        list.add_group_wait(group);
        assert!(list.remove_terminated_processes().is_empty());
        list.remove_group_wait(group);
        assert_eq!(list.remove_terminated_processes(), vec![pid]);
        assert!(list.get(pid).is_none());
    }

    #[test]
    fn test_detach_gets_fresh_started_group() {
        let mut list = ProcessList::new();
        let pid = list.create_process("t", 50);
        let group = list.allocate_process_group();
        list.resume_process(pid, group).unwrap();
        let fresh = list.detach_process(pid).unwrap();
        assert_ne!(fresh, group);
        assert_eq!(list.get(pid).unwrap().group(), Some(fresh));
    }
}
