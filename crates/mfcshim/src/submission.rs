// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Double-buffered hardware submission.
//!
//! Two engine input slots alternate between software and hardware. While the
//! engine executes the frame in one slot, the next frame is staged into the
//! other, so the copy is hidden behind hardware latency. Executions run on a
//! dedicated worker thread (or inline in blocking mode); the caller collects
//! each execution exactly once with [`SubmissionUnit::wait_done`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::engine::{HardwareEngine, InputSlot, SlotId};
use crate::sync::{lock, Semaphore};
use crate::Error;

/// Number of hardware input slots.
pub const MFC_INPUT_BUFFER_NUM_MAX: usize = 2;

/// Size of the default hardware input region, split across the slots.
pub const DEFAULT_MFC_INPUT_BUFFER_SIZE: usize = 1024 * 1024 * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by software, may be staged
    Filling,
    /// Owned by hardware, execution pending or running
    Submitted,
    /// Execution finished, results are being read
    Draining,
}

/// Where executions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMode {
    /// Dedicated execute worker thread
    Worker,
    /// On the caller's thread, inside `submit`
    Inline,
}

struct Slot {
    memory: Box<dyn InputSlot>,
    staged: usize,
    state: SlotState,
}

#[derive(Debug, Clone, Copy)]
struct Job {
    slot: SlotId,
    len: usize,
}

struct WorkerShared {
    start: Semaphore,
    done: Semaphore,
    exit: AtomicBool,
    job: Mutex<Option<Job>>,
    result: Mutex<Option<Result<(), Error>>>,
}

struct ExecuteWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl ExecuteWorker {
    fn spawn<E>(engine: Arc<Mutex<E>>) -> Result<Self, Error>
    where
        E: HardwareEngine + ?Sized + 'static,
    {
        let shared = Arc::new(WorkerShared {
            start: Semaphore::new(0),
            done: Semaphore::new(0),
            exit: AtomicBool::new(false),
            job: Mutex::new(None),
            result: Mutex::new(None),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("mfc-execute".to_string())
            .spawn(move || loop {
                worker.start.wait();
                if worker.exit.load(Ordering::Acquire) {
                    break;
                }
                let Some(job) = lock(&worker.job).take() else {
                    continue;
                };
                let result = {
                    let mut engine = lock(&engine);
                    engine
                        .set_in_buffer(job.slot, job.len)
                        .and_then(|()| engine.execute(job.len))
                };
                *lock(&worker.result) = Some(result);
                worker.done.post();
            })?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn start(&self, job: Job) {
        *lock(&self.shared.job) = Some(job);
        self.shared.start.post();
    }

    fn wait_done(&self) -> Result<(), Error> {
        self.shared.done.wait();
        lock(&self.shared.result)
            .take()
            .unwrap_or_else(|| Err(Error::Hardware("execution produced no result".into())))
    }

    fn stop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        self.shared.start.post();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("execute worker panicked");
            }
        }
    }
}

/// Double-buffered submission of frames to one engine.
pub struct SubmissionUnit<E: HardwareEngine + ?Sized + 'static> {
    engine: Arc<Mutex<E>>,
    slots: Vec<Slot>,
    next: usize,
    in_flight: Option<usize>,
    last_submitted: Option<usize>,
    worker: Option<ExecuteWorker>,
    inline_result: Option<Result<(), Error>>,
}

impl<E: HardwareEngine + ?Sized + 'static> SubmissionUnit<E> {
    /// Allocate `MFC_INPUT_BUFFER_NUM_MAX` slots of `slot_size` bytes from
    /// the engine and start the worker if `mode` asks for one.
    pub fn new(engine: Arc<Mutex<E>>, slot_size: usize, mode: ExecuteMode) -> Result<Self, Error> {
        let slots = {
            let mut guard = lock(&engine);
            (0..MFC_INPUT_BUFFER_NUM_MAX)
                .map(|_| {
                    guard.alloc_input_slot(slot_size).map(|memory| Slot {
                        memory,
                        staged: 0,
                        state: SlotState::Filling,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?
        };

        let worker = match mode {
            ExecuteMode::Worker => Some(ExecuteWorker::spawn(Arc::clone(&engine))?),
            ExecuteMode::Inline => None,
        };

        Ok(Self {
            engine,
            slots,
            next: 0,
            in_flight: None,
            last_submitted: None,
            worker,
            inline_result: None,
        })
    }

    pub fn engine(&self) -> &Arc<Mutex<E>> {
        &self.engine
    }

    pub fn mode(&self) -> ExecuteMode {
        if self.worker.is_some() {
            ExecuteMode::Worker
        } else {
            ExecuteMode::Inline
        }
    }

    /// Slot the next `stage` call fills.
    pub fn next_slot(&self) -> usize {
        self.next
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    pub fn slot_id(&self, index: usize) -> Option<SlotId> {
        self.slots.get(index).map(|slot| slot.memory.id())
    }

    pub fn staged_len(&self, index: usize) -> usize {
        self.slots.get(index).map_or(0, |slot| slot.staged)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Copy `bytes` into the slot not owned by hardware.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientResources`] if `bytes` exceeds the slot.
    pub fn stage(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let index = self.next;
        let slot = &mut self.slots[index];
        if slot.state == SlotState::Submitted {
            return Err(Error::IncorrectStateOperation);
        }
        let memory = slot.memory.as_mut_slice();
        if bytes.len() > memory.len() {
            return Err(Error::InsufficientResources(format!(
                "frame of {} bytes exceeds the {} byte input slot",
                bytes.len(),
                memory.len()
            )));
        }
        memory[..bytes.len()].copy_from_slice(bytes);
        slot.staged = bytes.len();
        slot.state = SlotState::Filling;
        Ok(index)
    }

    /// Hand a staged slot to the hardware and advance to the other slot.
    ///
    /// Only one execution may be outstanding; collect it with `wait_done`
    /// first.
    pub fn submit(&mut self, index: usize) -> Result<(), Error> {
        if self.in_flight.is_some() {
            return Err(Error::IncorrectStateOperation);
        }
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| Error::BadParameter(format!("no input slot {}", index)))?;
        slot.state = SlotState::Submitted;
        let job = Job {
            slot: slot.memory.id(),
            len: slot.staged,
        };

        self.in_flight = Some(index);
        self.last_submitted = Some(index);
        self.next = (index + 1) % self.slots.len();

        log::trace!("submit slot {} ({} bytes)", index, job.len);
        match &self.worker {
            Some(worker) => worker.start(job),
            None => {
                let mut engine = lock(&self.engine);
                let result = engine
                    .set_in_buffer(job.slot, job.len)
                    .and_then(|()| engine.execute(job.len));
                self.inline_result = Some(result);
            }
        }
        Ok(())
    }

    /// Stage `bytes` and submit them in one call.
    pub fn submit_next_frame(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let index = self.stage(bytes)?;
        self.submit(index)
    }

    /// Execute the last submitted slot again, its contents unchanged.
    pub fn resubmit(&mut self) -> Result<(), Error> {
        let index = self.last_submitted.ok_or(Error::IncorrectStateOperation)?;
        self.submit(index)
    }

    /// Wait for the outstanding execution and return its result.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn wait_done(&mut self) -> Option<Result<(), Error>> {
        let index = self.in_flight.take()?;
        let result = match &self.worker {
            Some(worker) => worker.wait_done(),
            None => self
                .inline_result
                .take()
                .unwrap_or_else(|| Err(Error::Hardware("execution produced no result".into()))),
        };
        self.slots[index].state = SlotState::Draining;
        Some(result)
    }

    /// Collect any outstanding execution and return every slot to software.
    pub fn reset(&mut self) {
        if let Some(Err(err)) = self.wait_done() {
            log::warn!("discarding failed execution: {}", err);
        }
        for slot in &mut self.slots {
            slot.state = SlotState::Filling;
            slot.staged = 0;
        }
        self.next = 0;
        self.last_submitted = None;
    }

    pub fn shutdown(&mut self) {
        self.reset();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}

impl<E: HardwareEngine + ?Sized + 'static> Drop for SubmissionUnit<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeapSlot;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        executions: Vec<(SlotId, usize)>,
        current: Option<SlotId>,
        fail_next: bool,
        slow: bool,
        allocated: usize,
    }

    impl HardwareEngine for Recorder {
        fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error> {
            let id = 100 + self.allocated;
            self.allocated += 1;
            Ok(Box::new(HeapSlot::new(id, size)))
        }

        fn set_in_buffer(&mut self, slot: SlotId, _len: usize) -> Result<(), Error> {
            self.current = Some(slot);
            Ok(())
        }

        fn execute(&mut self, len: usize) -> Result<(), Error> {
            if self.slow {
                thread::sleep(Duration::from_millis(10));
            }
            if std::mem::take(&mut self.fail_next) {
                return Err(Error::Hardware("injected".into()));
            }
            let slot = self.current.ok_or(Error::IncorrectStateOperation)?;
            self.executions.push((slot, len));
            Ok(())
        }
    }

    fn unit(mode: ExecuteMode) -> (Arc<Mutex<Recorder>>, SubmissionUnit<Recorder>) {
        let engine = Arc::new(Mutex::new(Recorder::default()));
        let unit = SubmissionUnit::new(Arc::clone(&engine), 64, mode).unwrap();
        (engine, unit)
    }

    #[test]
    fn test_slots_alternate() {
        let (engine, mut unit) = unit(ExecuteMode::Worker);
        for len in [10, 20, 30] {
            unit.submit_next_frame(&vec![1; len]).unwrap();
            unit.wait_done().unwrap().unwrap();
        }
        let executions = engine.lock().unwrap().executions.clone();
        assert_eq!(executions, vec![(100, 10), (101, 20), (100, 30)]);
    }

    #[test]
    fn test_stage_while_executing() {
        let (engine, mut unit) = unit(ExecuteMode::Worker);
        engine.lock().unwrap().slow = true;

        unit.submit_next_frame(&[1; 8]).unwrap();
        assert_eq!(unit.slot_state(0), Some(SlotState::Submitted));

        // The other slot can be filled while the first executes.
        let staged = unit.stage(&[2; 16]).unwrap();
        assert_eq!(staged, 1);
        assert_eq!(unit.slot_state(1), Some(SlotState::Filling));

        assert!(matches!(unit.submit(staged), Err(Error::IncorrectStateOperation)));
        unit.wait_done().unwrap().unwrap();
        assert_eq!(unit.slot_state(0), Some(SlotState::Draining));
        unit.submit(staged).unwrap();
        unit.wait_done().unwrap().unwrap();
        assert_eq!(engine.lock().unwrap().executions.len(), 2);
    }

    #[test]
    fn test_wait_done_once_per_execution() {
        let (_engine, mut unit) = unit(ExecuteMode::Worker);
        assert!(unit.wait_done().is_none());
        unit.submit_next_frame(&[0; 4]).unwrap();
        assert!(unit.wait_done().is_some());
        assert!(unit.wait_done().is_none());
    }

    #[test]
    fn test_inline_mode() {
        let (engine, mut unit) = unit(ExecuteMode::Inline);
        assert_eq!(unit.mode(), ExecuteMode::Inline);
        unit.submit_next_frame(&[0; 4]).unwrap();
        assert_eq!(engine.lock().unwrap().executions.len(), 1);
        unit.wait_done().unwrap().unwrap();
    }

    #[test]
    fn test_execute_error_reported() {
        let (engine, mut unit) = unit(ExecuteMode::Worker);
        engine.lock().unwrap().fail_next = true;
        unit.submit_next_frame(&[0; 4]).unwrap();
        assert!(matches!(unit.wait_done(), Some(Err(Error::Hardware(_)))));
    }

    #[test]
    fn test_resubmit_same_slot() {
        let (engine, mut unit) = unit(ExecuteMode::Inline);
        unit.submit_next_frame(&[0; 12]).unwrap();
        unit.wait_done().unwrap().unwrap();
        unit.resubmit().unwrap();
        unit.wait_done().unwrap().unwrap();
        let executions = engine.lock().unwrap().executions.clone();
        assert_eq!(executions, vec![(100, 12), (100, 12)]);
        assert_eq!(unit.next_slot(), 1);
    }

    #[test]
    fn test_oversized_frame() {
        let (_engine, mut unit) = unit(ExecuteMode::Inline);
        assert!(matches!(
            unit.stage(&[0; 65]),
            Err(Error::InsufficientResources(_))
        ));
    }

    #[test]
    fn test_shutdown_joins_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let (_engine, mut unit) = unit(ExecuteMode::Worker);
            unit.submit_next_frame(&[0; 4]).unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            // Dropping with an execution outstanding must not hang.
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
