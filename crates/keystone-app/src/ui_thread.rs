//! The UI-owning thread
//!
//! A named OS thread that owns a state value `S` and runs scheduled jobs against
//! it one at a time, in submission order. Any thread can schedule work through a
//! [`UiHandle`]; only the UI thread ever touches `S`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::mpsc;

use keystone_core::prelude::*;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum UiMessage<S> {
    Run(Job<S>),
    Shutdown,
}

/// Scheduling handle for the UI thread. Cheap to clone.
pub struct UiHandle<S> {
    tx: mpsc::UnboundedSender<UiMessage<S>>,
    thread_id: ThreadId,
}

impl<S> Clone for UiHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            thread_id: self.thread_id,
        }
    }
}

impl<S> std::fmt::Debug for UiHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl<S: 'static> UiHandle<S> {
    /// Queue `job` to run on the UI thread. Never blocks.
    pub fn run_on_ui_thread<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(UiMessage::Run(Box::new(job)))
            .map_err(|_| Error::UiThreadGone)
    }

    /// Run `job` on the UI thread and wait for its result.
    ///
    /// Must not be called from the UI thread itself.
    pub fn call<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_ui_thread() {
            error!("UiHandle::call from the UI thread would deadlock");
            return Err(Error::ChannelClosed);
        }
        // std channel: callers may sit inside a tokio runtime
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.run_on_ui_thread(move |state| {
            let _ = tx.send(job(state));
        })?;
        rx.recv().map_err(|_| Error::UiThreadGone)
    }

    pub fn is_ui_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Log (and in debug builds, panic) when called off the UI thread.
    pub fn assert_on_ui_thread(&self) {
        if !self.is_ui_thread() {
            error!(
                "UI-affine code running on {:?}",
                std::thread::current().name().unwrap_or("<unnamed>")
            );
            debug_assert!(false, "must run on the UI thread");
        }
    }

    /// Ask the UI thread to stop after the jobs already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(UiMessage::Shutdown);
    }
}

/// Owner of the UI thread
pub struct UiThread<S> {
    handle: UiHandle<S>,
    join: Option<JoinHandle<()>>,
}

impl<S: Default + 'static> UiThread<S> {
    /// Start the UI thread. `S` is created on the thread itself.
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiMessage<S>>();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = S::default();
                debug!("UI thread started");
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        UiMessage::Run(job) => {
                            let outcome = catch_unwind(AssertUnwindSafe(|| job(&mut state)));
                            if outcome.is_err() {
                                error!("UI job panicked; continuing");
                            }
                        }
                        UiMessage::Shutdown => break,
                    }
                }
                debug!("UI thread stopped");
            })?;

        let thread_id = join.thread().id();
        Ok(Self {
            handle: UiHandle { tx, thread_id },
            join: Some(join),
        })
    }
}

impl<S> UiThread<S> {
    pub fn handle(&self) -> UiHandle<S> {
        self.handle.clone()
    }

    /// Stop after the queued jobs and wait for the thread to exit.
    pub fn join(mut self) {
        let _ = self.handle.tx.send(UiMessage::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("UI thread terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_order_on_ui_thread() {
        let ui = UiThread::<Vec<u32>>::spawn("test-ui").unwrap();
        let handle = ui.handle();
        for i in 0..5 {
            let h = handle.clone();
            handle
                .run_on_ui_thread(move |state| {
                    assert!(h.is_ui_thread());
                    state.push(i);
                })
                .unwrap();
        }
        let seen = handle.call(|state| state.clone()).unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(!handle.is_ui_thread());
        ui.join();
    }

    #[test]
    fn test_panicking_job_does_not_kill_thread() {
        let ui = UiThread::<u32>::spawn("test-ui").unwrap();
        let handle = ui.handle();
        handle.run_on_ui_thread(|_| panic!("bad job")).unwrap();
        handle.run_on_ui_thread(|n| *n += 1).unwrap();
        assert_eq!(handle.call(|n| *n).unwrap(), 1);
        ui.join();
    }

    #[test]
    fn test_schedule_after_join_fails() {
        let ui = UiThread::<()>::spawn("test-ui").unwrap();
        let handle = ui.handle();
        ui.join();
        assert!(matches!(
            handle.run_on_ui_thread(|_| {}),
            Err(Error::UiThreadGone)
        ));
    }

    #[test]
    fn test_queued_jobs_finish_before_shutdown() {
        let ui = UiThread::<()>::spawn("test-ui").unwrap();
        let handle = ui.handle();
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            handle.run_on_ui_thread(move |_| tx.send(i).unwrap()).unwrap();
        }
        ui.join();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
