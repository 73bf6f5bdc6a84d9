//! Interpreter execution engine.
//!
//! Runs one interpreter invocation per file under a size guard, a wall-clock
//! deadline and a bounded worker pool. Every failure mode is turned into an
//! [`InterpretationResult`]; nothing in here returns an error to the caller.
//!
//! Each invocation gets its own named worker thread. When the deadline
//! passes the engine answers `TIMEOUT` straight away, flags the budget so a
//! cooperative interpreter stops, and abandons the thread. An abandoned
//! thread never takes new work and its eventual result is dropped.

mod stats;

pub use stats::EngineStats;

use std::any::Any;
use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::interpreter::{
    Budget, CancelToken, Extracted, InterpretContext, InterpretError, InterpretOutcome,
    Interpreter, Resolution,
};
use crate::models::{ErrorKind, FileDescriptor, InterpretationResult};
use stats::Counters;

/// Bounded pool that runs interpreters.
pub struct ExecutionEngine {
    config: EngineConfig,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    worker_seq: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config,
            slots: Arc::new(Semaphore::new(permits)),
            counters: Arc::new(Counters::default()),
            worker_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Worker slots, i.e. how many interpretations may run at once.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Interpret one file.
    pub async fn run(
        &self,
        descriptor: &FileDescriptor,
        resolution: &Resolution,
        cancel: &CancelToken,
    ) -> InterpretationResult {
        let started = Instant::now();
        let definition = &resolution.definition;
        let fail = |kind: ErrorKind, message: String| {
            InterpretationResult::error(&definition.id, &definition.version, kind, message, None)
        };

        let max_size = resolution
            .max_size_bytes()
            .unwrap_or(self.config.default_max_size_bytes);
        if descriptor.size > max_size {
            return self.seal(
                fail(
                    ErrorKind::FileTooLarge,
                    format!("{} bytes exceeds the {} byte limit", descriptor.size, max_size),
                ),
                started,
            );
        }
        if cancel.is_canceled() {
            return self.seal(fail(ErrorKind::Canceled, "session was canceled".into()), started);
        }

        let capacity = self.max_concurrent() + self.config.max_queue;
        if !self.counters.admit(capacity) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("Rejected {}: {} requests already in flight", descriptor.path, capacity);
            return self.seal(
                fail(
                    ErrorKind::Backpressure,
                    format!("{} interpretations already in flight", capacity),
                ),
                started,
            );
        }
        let _admission = Admission(&self.counters);

        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.seal(fail(ErrorKind::Internal, "engine is shut down".into()), started)
            }
        };
        if cancel.is_canceled() {
            return self.seal(fail(ErrorKind::Canceled, "session was canceled".into()), started);
        }

        let timeout = resolution
            .timeout()
            .unwrap_or_else(|| self.config.default_timeout());
        let budget = Budget::new(timeout, cancel.clone());
        let job = Job {
            descriptor: descriptor.clone(),
            config: resolution.config.clone(),
            interpreter: Arc::clone(definition.interpreter()),
            budget: budget.clone(),
            counters: Arc::clone(&self.counters),
        };

        let (tx, mut rx) = oneshot::channel();
        let name = format!("strata-worker-{}", self.worker_seq.fetch_add(1, Ordering::Relaxed));
        if let Err(e) = thread::Builder::new().name(name).spawn(move || job.run(tx)) {
            return self.seal(
                fail(ErrorKind::Internal, format!("failed to start worker: {}", e)),
                started,
            );
        }

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                // Count first so a worker finishing right now never underflows.
                self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
                if budget.abandon() {
                    self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Interpreter {} timed out after {} ms on {}",
                        definition.id,
                        timeout.as_millis(),
                        descriptor.path
                    );
                    drop(permit);
                    return self.seal(
                        fail(
                            ErrorKind::Timeout,
                            format!("exceeded the {} ms budget", timeout.as_millis()),
                        ),
                        started,
                    );
                }
                // Finished on the deadline; the result is already on its way.
                self.counters.abandoned.fetch_sub(1, Ordering::SeqCst);
                rx.await
            }
        };
        drop(permit);

        let result = match outcome {
            Ok(outcome) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                into_result(resolution, outcome)
            }
            Err(_) => fail(ErrorKind::Internal, "worker exited without a result".into()),
        };
        debug!(
            "Interpreted {} with {} ({:?})",
            descriptor.path, definition.id, result.status
        );
        self.seal(result, started)
    }

    fn seal(&self, result: InterpretationResult, started: Instant) -> InterpretationResult {
        let mut result = result.with_duration(started.elapsed());
        result.enforce_payload_cap(self.config.max_payload_bytes);
        result
    }
}

/// Releases the in-flight reservation on every exit path.
struct Admission<'a>(&'a Counters);

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Everything a worker thread owns.
struct Job {
    descriptor: FileDescriptor,
    config: Map<String, Value>,
    interpreter: Arc<dyn Interpreter>,
    budget: Budget,
    counters: Arc<Counters>,
}

impl Job {
    fn run(self, tx: oneshot::Sender<InterpretOutcome>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|payload| {
                Err(InterpretError::new(
                    ErrorKind::Internal,
                    format!("interpreter panicked: {}", panic_message(payload.as_ref())),
                ))
            });

        if !self.budget.finish() {
            self.counters.abandoned.fetch_sub(1, Ordering::SeqCst);
            debug!("Abandoned worker for {} finished late", self.descriptor.path);
            return;
        }
        let _ = tx.send(outcome);
    }

    fn execute(&self) -> InterpretOutcome {
        let file = File::open(&self.descriptor.path).map_err(InterpretError::io)?;
        let mut reader = BufReader::new(file);
        let ctx = InterpretContext::new(&self.descriptor, &self.config, &self.budget);
        self.interpreter.interpret(&mut reader, &ctx)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn into_result(resolution: &Resolution, outcome: InterpretOutcome) -> InterpretationResult {
    let id = &resolution.definition.id;
    let version = &resolution.definition.version;
    match outcome {
        Ok(Extracted {
            data,
            coverage: None,
            warnings,
        }) => InterpretationResult::success(id, version, data).with_warnings(warnings),
        Ok(Extracted {
            data,
            coverage: Some(coverage),
            warnings,
        }) => InterpretationResult::partial(id, version, data, coverage).with_warnings(warnings),
        Err(err) => InterpretationResult::error(id, version, err.kind, err.message, err.offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::InterpreterDefinition;
    use crate::models::ResultStatus;
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct Echo;

    impl Interpreter for Echo {
        fn interpret(&self, input: &mut dyn Read, _ctx: &InterpretContext<'_>) -> InterpretOutcome {
            let mut text = String::new();
            input.read_to_string(&mut text).map_err(InterpretError::io)?;
            let mut data = Map::new();
            data.insert("text".into(), Value::String(text));
            Ok(Extracted::complete(data))
        }
    }

    struct Panics;

    impl Interpreter for Panics {
        fn interpret(&self, _input: &mut dyn Read, _ctx: &InterpretContext<'_>) -> InterpretOutcome {
            panic!("boom")
        }
    }

    /// Spins until its budget says stop.
    struct Cooperative;

    impl Interpreter for Cooperative {
        fn interpret(&self, _input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
            loop {
                ctx.budget.check()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    /// Holds its worker until the gate opens.
    struct Gate(Arc<AtomicBool>);

    impl Interpreter for Gate {
        fn interpret(&self, _input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
            while !self.0.load(Ordering::SeqCst) {
                ctx.budget.check()?;
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(Extracted::complete(Map::new()))
        }
    }

    fn resolution(def: InterpreterDefinition) -> Resolution {
        Resolution {
            config: def.config.clone(),
            definition: Arc::new(def),
            rule_id: None,
        }
    }

    fn temp_file(body: &str) -> (tempfile::NamedTempFile, FileDescriptor) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let fd = FileDescriptor::new(
            file.path().to_string_lossy().into_owned(),
            body.len() as u64,
            0,
        );
        (file, fd)
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_success() {
        let (_file, fd) = temp_file("hello");
        let res = resolution(InterpreterDefinition::new("echo", "1", Arc::new(Echo)));
        let result = engine().run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.data["text"], "hello");
        assert_eq!(result.interpreter_id, "echo");
    }

    #[tokio::test]
    async fn test_size_guard_does_not_open_file() {
        let fd = FileDescriptor::new("/definitely/not/here.txt", 2048, 0);
        let res = resolution(
            InterpreterDefinition::new("echo", "1", Arc::new(Echo)).with_max_size(1024),
        );
        let result = engine().run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::FileTooLarge));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let fd = FileDescriptor::new("/definitely/not/here.txt", 1, 0);
        let res = resolution(InterpreterDefinition::new("echo", "1", Arc::new(Echo)));
        let result = engine().run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::IoError));
    }

    #[tokio::test]
    async fn test_panic_is_internal() {
        let (_file, fd) = temp_file("x");
        let res = resolution(InterpreterDefinition::new("p", "1", Arc::new(Panics)));
        let result = engine().run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Internal));
        assert!(result.issues[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_cooperative_timeout() {
        let (_file, fd) = temp_file("x");
        let res = resolution(
            InterpreterDefinition::new("slow", "1", Arc::new(Cooperative))
                .with_timeout(Duration::from_millis(50)),
        );
        let engine = engine();
        let started = Instant::now();
        let result = engine.run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.stats().timed_out, 1);
        assert_eq!(engine.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_backpressure_when_slots_and_queue_are_full() {
        let (_file, fd) = temp_file("x");
        let gate = Arc::new(AtomicBool::new(false));
        let res = resolution(
            InterpreterDefinition::new("gate", "1", Arc::new(Gate(gate.clone())))
                .with_timeout(Duration::from_secs(10)),
        );
        let engine = ExecutionEngine::new(EngineConfig {
            max_concurrent: 1,
            max_queue: 1,
            ..EngineConfig::default()
        });

        let first = async { engine.run(&fd, &res, &CancelToken::new()).await };
        let second = async { engine.run(&fd, &res, &CancelToken::new()).await };
        let overflow = async {
            // One running, one waiting for the slot.
            let deadline = Instant::now() + Duration::from_secs(5);
            while engine.stats().in_flight < 2 {
                assert!(Instant::now() < deadline, "requests were never admitted");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let result = engine.run(&fd, &res, &CancelToken::new()).await;
            gate.store(true, Ordering::SeqCst);
            result
        };
        let (first, second, rejected) = tokio::join!(first, second, overflow);

        assert_eq!(rejected.error_kind(), Some(ErrorKind::Backpressure));
        assert!(rejected.data.is_empty());
        assert_eq!(first.status, ResultStatus::Success);
        assert_eq!(second.status, ResultStatus::Success);

        let stats = engine.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_canceled_before_dispatch() {
        let (_file, fd) = temp_file("x");
        let res = resolution(InterpreterDefinition::new("echo", "1", Arc::new(Echo)));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = engine().run(&fd, &res, &cancel).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Canceled));
    }

    #[tokio::test]
    async fn test_payload_cap() {
        let (_file, fd) = temp_file(&"y".repeat(4096));
        let res = resolution(InterpreterDefinition::new("echo", "1", Arc::new(Echo)));
        let engine = ExecutionEngine::new(EngineConfig {
            max_payload_bytes: 256,
            ..EngineConfig::default()
        });
        let result = engine.run(&fd, &res, &CancelToken::new()).await;
        assert_eq!(result.data["truncated"], true);
        assert!(result.data.get("text").is_none());
    }

    #[tokio::test]
    async fn test_rule_config_overrides_limits() {
        let (_file, fd) = temp_file("0123456789");
        let def = InterpreterDefinition::new("echo", "1", Arc::new(Echo)).with_max_size(4);
        let mut res = resolution(def);
        assert_eq!(
            engine().run(&fd, &res, &CancelToken::new()).await.error_kind(),
            Some(ErrorKind::FileTooLarge)
        );
        res.config.insert("max_size_bytes".into(), Value::from(100));
        assert_eq!(
            engine().run(&fd, &res, &CancelToken::new()).await.status,
            ResultStatus::Success
        );
    }
}
