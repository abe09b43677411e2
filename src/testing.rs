//! In-memory guest process for unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::RunningOs;
use crate::os::OperatingSystem;
use crate::process::GuestProcess;
use crate::status::RecordingSink;

#[derive(Default)]
struct Shared {
    inputs: Mutex<Vec<String>>,
    dead: AtomicBool,
    destroyed: AtomicBool,
    killed: AtomicBool,
}

/// Records everything typed into it. Exits with code 0.
pub(crate) struct FakeProcess {
    shared: Arc<Shared>,
}

/// Observer side of a [`FakeProcess`].
#[derive(Clone)]
pub(crate) struct FakeHandle {
    shared: Arc<Shared>,
}

impl FakeHandle {
    pub(crate) fn inputs(&self) -> Vec<String> {
        self.shared.inputs.lock().unwrap().clone()
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.shared.dead.store(!alive, Ordering::SeqCst);
    }

    pub(crate) fn destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }
}

pub(crate) fn fake_process() -> (FakeProcess, FakeHandle) {
    let shared = Arc::new(Shared::default());
    (
        FakeProcess {
            shared: Arc::clone(&shared),
        },
        FakeHandle { shared },
    )
}

impl GuestProcess for FakeProcess {
    fn write_input(&mut self, input: &str) -> io::Result<()> {
        self.shared.inputs.lock().unwrap().push(input.to_string());
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.shared.dead.load(Ordering::SeqCst)
    }

    fn destroy(&mut self) -> io::Result<()> {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        self.shared.dead.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy_forcibly(&mut self) -> io::Result<()> {
        self.shared.killed.store(true, Ordering::SeqCst);
        self.shared.dead.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_exit(&mut self) -> io::Result<i32> {
        self.shared.dead.store(true, Ordering::SeqCst);
        Ok(0)
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

pub(crate) fn running_os(os: &OperatingSystem) -> (RunningOs, FakeHandle, Arc<RecordingSink>) {
    let (process, handle) = fake_process();
    let sink = Arc::new(RecordingSink::new());
    let running = RunningOs::new(Box::new(process), os, sink.clone());
    (running, handle, sink)
}
