use super::{CancelFlag, GenerateOptions, RunOutcome, TwoPassGenerator};
use crate::error::{GenerateError, ModelError};
use crate::group::group_by_date;
use crate::model::ChatModel;
use crate::types::{AgendaRow, DateGroup, GenerationEvent};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum SlotState {
    Loading,
    Ready(Box<dyn ChatModel>),
    Busy,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
    Busy,
    Failed(String),
}

struct SlotInner {
    state: Mutex<SlotState>,
    changed: Condvar,
}

/// Shared home of the model: loaded once, lent to one run at a time.
#[derive(Clone)]
pub struct ModelSlot {
    inner: Arc<SlotInner>,
}

impl ModelSlot {
    fn with_state(state: SlotState) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn loading() -> Self {
        Self::with_state(SlotState::Loading)
    }

    pub fn ready(model: Box<dyn ChatModel>) -> Self {
        Self::with_state(SlotState::Ready(model))
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: SlotState) {
        *self.lock() = state;
        self.inner.changed.notify_all();
    }

    pub fn install(&self, model: Box<dyn ChatModel>) {
        self.set(SlotState::Ready(model));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.set(SlotState::Failed(reason.into()));
    }

    /// Build and probe the model on a background thread, then publish the result.
    pub fn spawn_loader<F>(&self, build: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<Box<dyn ChatModel>, ModelError> + Send + 'static,
    {
        self.set(SlotState::Loading);
        let slot = self.clone();
        thread::Builder::new()
            .name("docket-model-loader".into())
            .spawn(move || {
                let loaded = build().and_then(|model| model.probe().map(|()| model));
                match loaded {
                    Ok(model) => {
                        info!(model = model.name(), "model ready");
                        slot.install(model);
                    }
                    Err(err) => {
                        warn!(error = %err, "model failed to load");
                        slot.fail(err.to_string());
                    }
                }
            })
    }

    pub fn status(&self) -> ModelStatus {
        status_of(&self.lock())
    }

    /// Block while the model is loading, up to `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> ModelStatus {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |state| matches!(state, SlotState::Loading))
            .unwrap_or_else(PoisonError::into_inner);
        status_of(&guard)
    }

    fn take(&self) -> Result<Box<dyn ChatModel>, GenerateError> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Busy) {
            SlotState::Ready(model) => Ok(model),
            SlotState::Loading => {
                *state = SlotState::Loading;
                Err(GenerateError::ModelNotReady)
            }
            SlotState::Busy => Err(GenerateError::Busy),
            SlotState::Failed(reason) => {
                *state = SlotState::Failed(reason.clone());
                Err(GenerateError::ModelUnavailable(reason))
            }
        }
    }
}

fn status_of(state: &SlotState) -> ModelStatus {
    match state {
        SlotState::Loading => ModelStatus::Loading,
        SlotState::Ready(_) => ModelStatus::Ready,
        SlotState::Busy => ModelStatus::Busy,
        SlotState::Failed(reason) => ModelStatus::Failed(reason.clone()),
    }
}

/// A model checked out of its slot; returned on drop, including during unwinding.
struct Lease {
    slot: ModelSlot,
    model: Option<Box<dyn ChatModel>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(model) = self.model.take() {
            self.slot.install(model);
        }
    }
}

/// Starts generation runs against a shared model slot.
pub struct Generator {
    slot: ModelSlot,
    options: GenerateOptions,
}

impl Generator {
    pub fn new(slot: ModelSlot, options: GenerateOptions) -> Self {
        Self { slot, options }
    }

    pub fn slot(&self) -> &ModelSlot {
        &self.slot
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Start a run on a dedicated worker thread.
    ///
    /// Empty input, a model that is not ready and a run already in flight are all
    /// rejected here, before any thread starts.
    pub fn generate(&self, rows: &[AgendaRow]) -> Result<GenerationHandle, GenerateError> {
        let groups = group_by_date(rows)?;
        let lease = Lease {
            slot: self.slot.clone(),
            model: Some(self.slot.take()?),
        };
        let options = self.options.clone();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let (event_tx, event_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("docket-generate".into())
            .spawn(move || run_worker(lease, &groups, &options, &worker_cancel, &event_tx))
            .map_err(|e| GenerateError::Worker(format!("thread spawn failed: {e}")))?;

        Ok(GenerationHandle {
            events: event_rx,
            cancel,
            thread: Some(thread),
        })
    }
}

fn run_worker(
    mut lease: Lease,
    groups: &[DateGroup],
    options: &GenerateOptions,
    cancel: &CancelFlag,
    event_tx: &Sender<GenerationEvent>,
) {
    let Some(model) = lease.model.as_deref_mut() else {
        return;
    };
    debug!(groups = groups.len(), model = model.name(), "generation worker started");

    let mut emit = |event: GenerationEvent| {
        if !cancel.is_cancelled() {
            let _ = event_tx.send(event);
        }
    };
    let result = TwoPassGenerator::new(model, options, cancel).run(groups, &mut emit);

    match result {
        Ok(RunOutcome::Completed(report)) => {
            info!(dates = report.dates.len(), chars = report.text.len(), "generation complete");
            emit(GenerationEvent::Completed(report));
        }
        Ok(RunOutcome::Cancelled) => {}
        Err(err) if cancel.is_cancelled() => {
            debug!(error = %err, "error after cancellation ignored");
        }
        Err(err) => {
            if let Err(mpsc::SendError(GenerationEvent::Failed(err))) =
                event_tx.send(GenerationEvent::Failed(err))
            {
                error!(error = %err, "generation failed");
            }
        }
    }
}

/// Caller side of a run: ordered events plus the cancel switch.
pub struct GenerationHandle {
    events: Receiver<GenerationEvent>,
    cancel: CancelFlag,
    thread: Option<JoinHandle<()>>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Next event, or `None` once the run has ended or been cancelled.
    pub fn recv(&self) -> Option<GenerationEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = self.events.recv().ok()?;
        (!self.cancel.is_cancelled()).then_some(event)
    }

    /// Wait for the worker thread to exit and the model to return to its slot.
    pub fn join(mut self) -> Result<(), GenerateError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| GenerateError::Worker("generation thread panicked".into())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Generator, ModelSlot, ModelStatus};
    use crate::error::{GenerateError, ModelError};
    use crate::generate::GenerateOptions;
    use crate::model::testing::ScriptedModel;
    use crate::model::{ChatModel, TokenStream};
    use crate::types::{AgendaRow, ChatMessage, GenerationEvent, SamplingParams};
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    /// Blocks every token read until the test releases it.
    struct GatedModel {
        gate: Mutex<Receiver<()>>,
    }

    impl GatedModel {
        fn new() -> (Self, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            (Self { gate: Mutex::new(rx) }, tx)
        }
    }

    impl ChatModel for GatedModel {
        fn name(&self) -> &str {
            "gated"
        }

        fn probe(&self) -> Result<(), ModelError> {
            Ok(())
        }

        fn stream_chat(
            &mut self,
            _messages: &[ChatMessage],
            _sampling: &SamplingParams,
        ) -> Result<TokenStream<'_>, ModelError> {
            let gate = &self.gate;
            Ok(Box::new(std::iter::from_fn(move || {
                gate.lock().unwrap().recv().ok().map(|()| Ok("tok".to_string()))
            })))
        }
    }

    fn rows() -> Vec<AgendaRow> {
        vec![AgendaRow {
            date: "10-Sep".into(),
            section: Some("Consent".into()),
            title: Some("Budget".into()),
            include: true,
            ..AgendaRow::default()
        }]
    }

    #[test]
    fn completed_run_delivers_events_in_order() {
        let model = ScriptedModel::new(&[&["<think>x</think>Consent: Budget"], &["September 10:"]]);
        let generator = Generator::new(ModelSlot::ready(Box::new(model)), GenerateOptions::default());
        let handle = generator.generate(&rows()).unwrap();
        let events: Vec<GenerationEvent> = std::iter::from_fn(|| handle.recv()).collect();
        handle.join().unwrap();

        assert!(matches!(events.first(), Some(GenerationEvent::GroupStarted { index: 0, .. })));
        match events.last() {
            Some(GenerationEvent::Completed(report)) => {
                assert_eq!(report.text, "September 10:\n\n");
                assert_eq!(report.dates, vec!["10-Sep"]);
            }
            other => panic!("unexpected last event: {other:?}"),
        }
        assert_eq!(generator.slot().status(), ModelStatus::Ready);
    }

    #[test]
    fn rejects_empty_input_before_touching_the_model() {
        let generator = Generator::new(ModelSlot::loading(), GenerateOptions::default());
        assert!(matches!(generator.generate(&[]), Err(GenerateError::EmptyInput)));
    }

    #[test]
    fn loading_and_failed_models_are_rejected() {
        let slot = ModelSlot::loading();
        let generator = Generator::new(slot.clone(), GenerateOptions::default());
        assert!(matches!(generator.generate(&rows()), Err(GenerateError::ModelNotReady)));
        assert_eq!(slot.status(), ModelStatus::Loading);

        slot.fail("connection refused");
        assert!(matches!(
            generator.generate(&rows()),
            Err(GenerateError::ModelUnavailable(reason)) if reason == "connection refused"
        ));
    }

    #[test]
    fn second_run_while_busy_is_rejected() {
        let (model, release) = GatedModel::new();
        let generator = Generator::new(ModelSlot::ready(Box::new(model)), GenerateOptions::default());
        let handle = generator.generate(&rows()).unwrap();
        assert_eq!(generator.slot().status(), ModelStatus::Busy);
        assert!(matches!(generator.generate(&rows()), Err(GenerateError::Busy)));

        drop(release);
        let events: Vec<GenerationEvent> = std::iter::from_fn(|| handle.recv()).collect();
        handle.join().unwrap();
        assert!(matches!(events.last(), Some(GenerationEvent::Completed(_))));
        assert_eq!(generator.slot().status(), ModelStatus::Ready);
        assert!(generator.generate(&rows()).is_ok());
    }

    #[test]
    fn cancelled_run_goes_quiet_and_returns_the_model() {
        let (model, release) = GatedModel::new();
        let generator = Generator::new(ModelSlot::ready(Box::new(model)), GenerateOptions::default());
        let handle = generator.generate(&rows()).unwrap();
        assert!(matches!(handle.recv(), Some(GenerationEvent::GroupStarted { .. })));
        release.send(()).unwrap();
        assert!(matches!(handle.recv(), Some(GenerationEvent::Token(_))));

        handle.cancel();
        release.send(()).unwrap();
        assert!(handle.recv().is_none());
        handle.join().unwrap();
        assert_eq!(generator.slot().status(), ModelStatus::Ready);
    }

    #[test]
    fn stream_errors_arrive_as_failed_event() {
        let generator = Generator::new(
            ModelSlot::ready(Box::new(ScriptedModel::new(&[]))),
            GenerateOptions::default(),
        );
        let handle = generator.generate(&rows()).unwrap();
        let events: Vec<GenerationEvent> = std::iter::from_fn(|| handle.recv()).collect();
        handle.join().unwrap();
        assert!(matches!(
            events.last(),
            Some(GenerationEvent::Failed(GenerateError::Stream(ModelError::Failed(_))))
        ));
        assert!(!events.iter().any(|event| matches!(event, GenerationEvent::Completed(_))));
    }

    #[test]
    fn loader_publishes_model_or_failure() {
        let slot = ModelSlot::loading();
        slot.spawn_loader(|| Ok(Box::new(ScriptedModel::new(&[])) as Box<dyn ChatModel>))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(slot.wait_ready(Duration::from_secs(1)), ModelStatus::Ready);

        slot.spawn_loader(|| Err(ModelError::Unavailable("no server".into())))
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(slot.wait_ready(Duration::from_secs(1)), ModelStatus::Failed(reason) if reason.contains("no server")));
    }

    #[test]
    fn wait_ready_times_out_while_loading() {
        let slot = ModelSlot::loading();
        assert_eq!(slot.wait_ready(Duration::from_millis(20)), ModelStatus::Loading);
    }
}
