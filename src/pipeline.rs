//! Multi-stage voice pipeline: transcribe → converse → synthesize.
//!
//! Each stage is an independent unit of async work; the executor owns the
//! contract between them. Stage k+1 starts only after stage k succeeded,
//! its output becoming the sole input of the next stage. The first failure
//! is terminal: it records the failing stage and nothing further runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{PipelineStage, PipelineTask, StageFailure};
use crate::service::turn_service::TurnService;
use crate::speech::{Synthesizer, Transcriber};

#[derive(Clone)]
pub struct PipelineExecutor {
    tasks: Arc<Mutex<HashMap<String, PipelineTask>>>,
    transcriber: Arc<dyn Transcriber>,
    turns: TurnService,
    synthesizer: Arc<dyn Synthesizer>,
}

impl PipelineExecutor {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        turns: TurnService,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            transcriber,
            turns,
            synthesizer,
        }
    }

    /// Enqueues a three-stage job and returns its task id immediately.
    /// The stages run on a spawned task, decoupled from the submitting
    /// request. Tasks run to completion or failure; there is no mid-stage
    /// cancellation and no automatic retry.
    pub fn submit(&self, session_id: &str, audio: Vec<u8>) -> String {
        let task = PipelineTask::new(session_id.to_string());
        let task_id = task.id.clone();
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(task_id.clone(), task);
        info!("Submitted voice pipeline task {task_id} for session {session_id}");

        let executor = self.clone();
        let id = task_id.clone();
        let session = session_id.to_string();
        tokio::spawn(async move {
            executor.run(&id, &session, audio).await;
        });

        task_id
    }

    /// Snapshot of the task's current state. Never blocks; a terminal task
    /// returns the same snapshot on every call.
    pub fn poll(&self, task_id: &str) -> Result<PipelineTask, AppError> {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(task_id)
            .cloned()
            .ok_or_else(|| AppError::TaskNotFound { id: task_id.to_string() })
    }

    async fn run(&self, task_id: &str, session_id: &str, audio: Vec<u8>) {
        // Stage 1: transcribe.
        let transcript = match self.transcriber.transcribe(&audio).await {
            Ok(t) => t,
            Err(e) => {
                self.fail(task_id, PipelineStage::Transcribing, &e);
                return;
            }
        };
        self.update(task_id, |task| {
            task.transcript = Some(transcript.clone());
            task.stage = PipelineStage::Conversing;
        });

        // Stage 2: one conversational turn, fed the transcript.
        let reply = match self.turns.take_turn(session_id, &transcript).await {
            Ok(r) => r.reply,
            Err(e) => {
                self.fail(task_id, PipelineStage::Conversing, &e);
                return;
            }
        };
        self.update(task_id, |task| {
            task.reply = Some(reply.clone());
            task.stage = PipelineStage::Synthesizing;
        });

        // Stage 3: synthesize the reply.
        let voice = match self.synthesizer.synthesize(&reply).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(task_id, PipelineStage::Synthesizing, &e);
                return;
            }
        };
        self.update(task_id, |task| {
            task.audio = Some(voice);
            task.stage = PipelineStage::Succeeded;
        });
        info!("Voice pipeline task {task_id} succeeded");
    }

    /// Applies a mutation unless the task already reached a terminal state.
    /// Terminal tasks are immutable.
    fn update(&self, task_id: &str, mutate: impl FnOnce(&mut PipelineTask)) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = tasks.get_mut(task_id) {
            if !task.stage.is_terminal() {
                mutate(task);
            }
        }
    }

    fn fail(&self, task_id: &str, stage: PipelineStage, err: &AppError) {
        error!("Voice pipeline task {task_id} failed at {stage}: {err}");
        self.update(task_id, |task| {
            task.failure = Some(StageFailure {
                stage,
                message: err.to_string(),
            });
            task.stage = PipelineStage::Failed;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::agent::TurnGenerator;
    use crate::db::memory::{MemoryConversationStore, MemoryReportStore};
    use crate::models::{Message, TurnPhase};

    struct StubGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TurnGenerator for StubGenerator {
        async fn generate(
            &self,
            _history: &[Message],
            _utterance: &str,
            _turn: u32,
            _phase: TurnPhase,
        ) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("how was your day?".to_string())
        }

        async fn generate_stream(
            &self,
            _history: &[Message],
            _utterance: &str,
            _turn: u32,
            _phase: TurnPhase,
            _tx: mpsc::Sender<String>,
        ) -> Result<(), AppError> {
            unreachable!("pipeline never streams")
        }
    }

    struct StubTranscriber {
        result: Result<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map_err(|message| AppError::TranscriptionFailed { message })
        }
    }

    struct StubSynthesizer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::SynthesisFailed { message: "voice service down".into() })
            } else {
                Ok(text.as_bytes().to_vec())
            }
        }
    }

    fn turn_service(generator: Arc<dyn TurnGenerator>) -> TurnService {
        let log = Arc::new(MemoryConversationStore::with_session("s1", "r1"));
        TurnService::new(log, Arc::new(MemoryReportStore::new()), generator, 7)
    }

    async fn poll_until_terminal(executor: &PipelineExecutor, task_id: &str) -> PipelineTask {
        for _ in 0..200 {
            let task = executor.poll(task_id).unwrap();
            if task.stage.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {task_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn all_stages_succeeding_populates_every_result() {
        let generator = Arc::new(StubGenerator { calls: AtomicUsize::new(0) });
        let executor = PipelineExecutor::new(
            Arc::new(StubTranscriber {
                result: Ok("hello there".into()),
                calls: AtomicUsize::new(0),
            }),
            turn_service(generator),
            Arc::new(StubSynthesizer { calls: AtomicUsize::new(0), fail: false }),
        );

        let task_id = executor.submit("s1", vec![1, 2, 3]);
        let task = poll_until_terminal(&executor, &task_id).await;

        assert_eq!(task.stage, PipelineStage::Succeeded);
        assert_eq!(task.transcript.as_deref(), Some("hello there"));
        assert!(task.reply.is_some());
        assert!(task.audio.is_some());
        assert!(task.failure.is_none());
    }

    #[tokio::test]
    async fn transcription_failure_short_circuits_later_stages() {
        let generator = Arc::new(StubGenerator { calls: AtomicUsize::new(0) });
        let synthesizer = Arc::new(StubSynthesizer { calls: AtomicUsize::new(0), fail: false });
        let executor = PipelineExecutor::new(
            Arc::new(StubTranscriber {
                result: Err("unreadable audio".into()),
                calls: AtomicUsize::new(0),
            }),
            turn_service(generator.clone()),
            synthesizer.clone(),
        );

        let task_id = executor.submit("s1", vec![0]);
        let task = poll_until_terminal(&executor, &task_id).await;

        assert_eq!(task.stage, PipelineStage::Failed);
        let failure = task.failure.clone().expect("failure record");
        assert_eq!(failure.stage, PipelineStage::Transcribing);
        assert!(failure.message.contains("unreadable audio"));

        // Neither the conversational stage nor synthesis ever ran.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);

        // Terminal failure is stable across repeated polls.
        for _ in 0..5 {
            let again = executor.poll(&task_id).unwrap();
            assert_eq!(again.stage, PipelineStage::Failed);
            assert_eq!(again.failure, task.failure);
        }
    }

    #[tokio::test]
    async fn synthesis_failure_preserves_earlier_results() {
        let generator = Arc::new(StubGenerator { calls: AtomicUsize::new(0) });
        let executor = PipelineExecutor::new(
            Arc::new(StubTranscriber {
                result: Ok("fine thanks".into()),
                calls: AtomicUsize::new(0),
            }),
            turn_service(generator),
            Arc::new(StubSynthesizer { calls: AtomicUsize::new(0), fail: true }),
        );

        let task_id = executor.submit("s1", vec![9]);
        let task = poll_until_terminal(&executor, &task_id).await;

        assert_eq!(task.stage, PipelineStage::Failed);
        assert_eq!(task.failure.as_ref().unwrap().stage, PipelineStage::Synthesizing);
        // Durable earlier-stage results are preserved.
        assert_eq!(task.transcript.as_deref(), Some("fine thanks"));
        assert!(task.reply.is_some());
        assert!(task.audio.is_none());
    }

    #[tokio::test]
    async fn polling_unknown_task_is_not_found() {
        let generator = Arc::new(StubGenerator { calls: AtomicUsize::new(0) });
        let executor = PipelineExecutor::new(
            Arc::new(StubTranscriber { result: Ok("x".into()), calls: AtomicUsize::new(0) }),
            turn_service(generator),
            Arc::new(StubSynthesizer { calls: AtomicUsize::new(0), fail: false }),
        );
        let err = executor.poll("missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
