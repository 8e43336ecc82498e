//! Background initialization
//!
//! Independent startup work (baseline data, dictionaries, warm-up) runs on one
//! worker thread while the UI thread builds the main window. The UI thread then
//! joins; any failure is fatal to startup.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use keystone_core::prelude::*;

type TaskFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// One named unit of background work
pub struct InitTask {
    name: String,
    run: TaskFn,
}

impl InitTask {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for InitTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitTask").field("name", &self.name).finish()
    }
}

enum Inner {
    Thread(JoinHandle<Result<()>>),
    Done(Result<()>),
}

/// Join handle returned by [`BackgroundInitRunner::start`]
pub struct BackgroundInitHandle {
    inner: Inner,
}

impl BackgroundInitHandle {
    /// Wait for every task. The first failure (error or panic) is returned.
    pub fn join(self) -> Result<()> {
        match self.inner {
            Inner::Done(result) => result,
            Inner::Thread(handle) => match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(Error::background_init(
                    "worker",
                    panic_message(payload.as_ref()),
                )),
            },
        }
    }
}

pub struct BackgroundInitRunner;

impl BackgroundInitRunner {
    /// Run `tasks` in order on a single worker thread.
    ///
    /// With `inline` set the same tasks run synchronously on the caller before
    /// this returns, in the same order.
    pub fn start(tasks: Vec<InitTask>, inline: bool) -> BackgroundInitHandle {
        if inline {
            info!("Background init disabled; running {} task(s) inline", tasks.len());
            return BackgroundInitHandle {
                inner: Inner::Done(run_all(tasks)),
            };
        }

        debug!("Starting background init with {} task(s)", tasks.len());
        let spawned = std::thread::Builder::new()
            .name("keystone-init".into())
            .spawn(move || run_all(tasks));

        let inner = match spawned {
            Ok(handle) => Inner::Thread(handle),
            Err(e) => Inner::Done(Err(Error::background_init(
                "spawn",
                format!("failed to start worker thread: {}", e),
            ))),
        };
        BackgroundInitHandle { inner }
    }
}

/// Run tasks sequentially; stop at the first failure.
fn run_all(tasks: Vec<InitTask>) -> Result<()> {
    for task in tasks {
        let InitTask { name, run } = task;
        let started = std::time::Instant::now();
        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => debug!("Init task {} done in {:?}", name, started.elapsed()),
            Ok(Err(e)) => {
                error!("Init task {} failed: {}", name, e);
                return Err(Error::background_init(name, e.to_string()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Init task {} panicked: {}", name, message);
                return Err(Error::background_init(name, message));
            }
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> InitTask) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let make = move |name: &str| {
            let l = Arc::clone(&l);
            let n = name.to_string();
            InitTask::new(name, move || {
                l.lock().unwrap().push(n);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_tasks_run_in_order_on_worker() {
        let (log, task) = recorder();
        let caller = std::thread::current().id();
        let off_thread = InitTask::new("check-thread", move || {
            assert_ne!(std::thread::current().id(), caller);
            Ok(())
        });
        let handle = BackgroundInitRunner::start(
            vec![task("dictionary"), task("spelling"), off_thread],
            false,
        );
        handle.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["dictionary", "spelling"]);
    }

    #[test]
    fn test_inline_runs_before_start_returns() {
        let (log, task) = recorder();
        let caller = std::thread::current().id();
        let same_thread = InitTask::new("check-thread", move || {
            assert_eq!(std::thread::current().id(), caller);
            Ok(())
        });
        let handle = BackgroundInitRunner::start(vec![task("a"), same_thread, task("b")], true);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        handle.join().unwrap();
    }

    #[test]
    fn test_error_is_tagged_with_task_and_stops_sequence() {
        let (log, task) = recorder();
        let failing = InitTask::new("baseline", || Err(Error::settings("bad data")));
        let err = BackgroundInitRunner::start(vec![task("a"), failing, task("never")], false)
            .join()
            .unwrap_err();
        assert!(err.is_fatal());
        match err {
            Error::BackgroundInit { task, .. } => assert_eq!(task, "baseline"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_panic_is_captured() {
        let boom = InitTask::new("warmup", || panic!("exploded"));
        let err = BackgroundInitRunner::start(vec![boom], false).join().unwrap_err();
        match err {
            Error::BackgroundInit { task, message } => {
                assert_eq!(task, "warmup");
                assert!(message.contains("exploded"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_panic_inline_is_captured() {
        let boom = InitTask::new("warmup", || panic!("exploded"));
        assert!(BackgroundInitRunner::start(vec![boom], true).join().is_err());
    }
}
