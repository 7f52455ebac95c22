use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

use super::{Backend, BackendError, DispatchExtent, KernelArg};
use crate::specialization::BuildOptions;

/// A [Backend] which compiles nothing and runs nothing, but records every
/// request it receives. Used by the planner binary and by tests.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: Mutex<State>,
}

/// A handle to storage owned by a [RecordingBackend].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedProgram {
    pub id: u32,
    pub name: String,
    pub options: BuildOptions,
}

/// One enqueued launch and the arguments bound when it was enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDispatch {
    pub program: String,
    pub program_id: u32,
    pub extent: DispatchExtent,
    pub args: Vec<KernelArg<BufferId>>,
}

#[derive(Debug, Default)]
struct State {
    next_buffer: u32,
    compiled: Vec<(String, BuildOptions)>,
    failing: HashSet<String>,
    queue_capacity: Option<usize>,
    bound: HashMap<u32, BTreeMap<u32, KernelArg<BufferId>>>,
    dispatches: Vec<RecordedDispatch>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        RecordingBackend::default()
    }

    /// Makes every later compile of `program` fail.
    pub fn fail_compiles_of(&self, program: &str) {
        self.state.lock().failing.insert(program.to_string());
    }

    /// Makes enqueues fail while `capacity` launches are recorded.
    pub fn limit_queue_to(&self, capacity: usize) {
        self.state.lock().queue_capacity = Some(capacity);
    }

    pub fn allocate_buffer(&self) -> BufferId {
        let mut state = self.state.lock();
        let id = BufferId(state.next_buffer);
        state.next_buffer += 1;
        id
    }

    /// The number of successful compiles so far.
    pub fn compile_count(&self) -> usize {
        self.state.lock().compiled.len()
    }

    pub fn compiled(&self) -> Vec<(String, BuildOptions)> {
        self.state.lock().compiled.clone()
    }

    pub fn dispatches(&self) -> Vec<RecordedDispatch> {
        self.state.lock().dispatches.clone()
    }

    pub fn take_dispatches(&self) -> Vec<RecordedDispatch> {
        std::mem::take(&mut self.state.lock().dispatches)
    }
}

impl Backend for RecordingBackend {
    type Program = RecordedProgram;
    type Buffer = BufferId;

    fn compile(&self, name: &str, options: &BuildOptions) -> Result<RecordedProgram, BackendError> {
        let mut state = self.state.lock();
        if state.failing.contains(name) {
            return Err(BackendError::Compile {
                program: name.to_string(),
                reason: "compilation disabled for this program".to_string(),
            });
        }
        let id = u32::try_from(state.compiled.len()).unwrap();
        state.compiled.push((name.to_string(), options.clone()));
        Ok(RecordedProgram {
            id,
            name: name.to_string(),
            options: options.clone(),
        })
    }

    fn bind_argument(
        &self,
        program: &RecordedProgram,
        index: u32,
        arg: KernelArg<BufferId>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if let KernelArg::Buffer(BufferId(id)) = &arg {
            if *id >= state.next_buffer {
                return Err(BackendError::Bind {
                    index,
                    reason: format!("buffer {id} was never allocated"),
                });
            }
        }
        state.bound.entry(program.id).or_default().insert(index, arg);
        Ok(())
    }

    fn enqueue(&self, program: &RecordedProgram, extent: DispatchExtent) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.queue_capacity.is_some_and(|c| state.dispatches.len() >= c) {
            return Err(BackendError::Rejected(format!(
                "queue is full; cannot enqueue `{}`",
                program.name
            )));
        }
        let bound = state.bound.get(&program.id).cloned().unwrap_or_default();
        if let Some(missing) = (0..u32::try_from(bound.len()).unwrap()).find(|i| !bound.contains_key(i)) {
            return Err(BackendError::Rejected(format!(
                "argument {} of `{}` is unbound",
                missing, program.name
            )));
        }
        state.dispatches.push(RecordedDispatch {
            program: program.name.clone(),
            program_id: program.id,
            extent,
            args: bound.into_values().collect(),
        });
        Ok(())
    }
}

impl Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf{}", self.0)
    }
}
