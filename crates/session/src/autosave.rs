/// Debounced autosave timer
///
/// At most one timer is pending. Arming again aborts the previous sleep, so
/// only the last edit in a quiet period makes the timer fire.
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

pub struct AutosaveTimer {
    debounce: Duration,
    generation: u64,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
    fired_tx: mpsc::UnboundedSender<u64>,
    fired_rx: mpsc::UnboundedReceiver<u64>,
}

impl AutosaveTimer {
    pub fn new(debounce: Duration) -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            debounce,
            generation: 0,
            deadline: None,
            task: None,
            fired_tx,
            fired_rx,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// (Re)start the quiet period, cancelling any pending timer.
    pub fn arm(&mut self) {
        self.abort_task();
        self.generation += 1;
        self.deadline = Some(Instant::now() + self.debounce);

        // Without a runtime the deadline is still honoured by `take_due`
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let generation = self.generation;
            let debounce = self.debounce;
            let tx = self.fired_tx.clone();
            self.task = Some(handle.spawn(async move {
                tokio::time::sleep(debounce).await;
                let _ = tx.send(generation);
            }));
        }
    }

    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Autosave cancelled");
        }
        self.abort_task();
        self.generation += 1;
    }

    /// True once if the current timer has fired since the last call.
    pub fn take_due(&mut self) -> bool {
        let mut fired = false;
        while let Ok(generation) = self.fired_rx.try_recv() {
            fired |= generation == self.generation;
        }
        if !fired {
            fired = matches!(self.deadline, Some(deadline) if Instant::now() >= deadline);
        }
        if fired && self.deadline.is_some() {
            self.finish();
            return true;
        }
        false
    }

    /// Wait for the pending timer. Returns false right away if none is armed.
    pub async fn wait_due(&mut self) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if self.task.is_none() {
            tokio::time::sleep_until(deadline).await;
            self.finish();
            return true;
        }
        while let Some(generation) = self.fired_rx.recv().await {
            if generation == self.generation {
                self.finish();
                return true;
            }
        }
        false
    }

    fn finish(&mut self) {
        self.deadline = None;
        self.task = None;
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AutosaveTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}
