//! FIFO of programs operating the same guest.

use std::collections::VecDeque;

use tracing::debug;

use crate::driver::RunningOs;
use crate::error::SessionError;
use crate::io::Io;
use crate::program::Program;
use crate::status::HasStatus;

/// Programs run one after another; only the head sees output.
///
/// When the head completes on a line, that line is offered once more to the
/// next program. A prompt that finished one program (say, the shell prompt
/// after login) is usually exactly what the next program waits for.
#[derive(Debug, Default)]
pub struct ProgramQueue {
    programs: VecDeque<Program>,
}

impl ProgramQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, program: Program) {
        self.programs.push_back(program);
    }

    pub fn push_front(&mut self, program: Program) {
        self.programs.push_front(program);
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// The active program, if any.
    pub fn head(&self) -> Option<&Program> {
        self.programs.front()
    }

    /// Programs still to complete, head first.
    pub fn pending(&self) -> Vec<&dyn HasStatus> {
        self.programs.iter().map(|p| p as &dyn HasStatus).collect()
    }

    /// Hand `io` to the head program.
    ///
    /// Returns the names of the programs this line completed, in order.
    pub fn feed(&mut self, os: &mut RunningOs, io: &Io) -> Result<Vec<String>, SessionError> {
        let mut completed = Vec::new();
        if self.offer(os, io, &mut completed)? {
            self.offer(os, io, &mut completed)?;
        }
        Ok(completed)
    }

    /// Offer `io` to the head. Returns whether the head completed and was popped.
    fn offer(&mut self, os: &mut RunningOs, io: &Io, completed: &mut Vec<String>) -> Result<bool, SessionError> {
        let Some(head) = self.programs.front_mut() else {
            return Ok(false);
        };
        if head.calc(os, io)? {
            return Ok(false);
        }
        if let Some(done) = self.programs.pop_front() {
            debug!("program '{}' completed; {} left", done.name(), self.programs.len());
            completed.push(done.name().to_string());
        }
        Ok(true)
    }
}

impl From<Vec<Program>> for ProgramQueue {
    fn from(programs: Vec<Program>) -> Self {
        Self {
            programs: programs.into(),
        }
    }
}

impl Extend<Program> for ProgramQueue {
    fn extend<T: IntoIterator<Item = Program>>(&mut self, iter: T) {
        self.programs.extend(iter);
    }
}
