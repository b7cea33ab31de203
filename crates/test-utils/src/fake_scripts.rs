#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use ingestflow::exec::{HandlerFuture, Invocation, ScriptHandler, ScriptReport};

/// What a `FakeScript` does on one call.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Exit(i32),
    Report(ScriptReport),
    /// The handler returns `Err`.
    Error(String),
    /// The handler panics, which the pool treats as a lost worker.
    Panic(String),
    /// Never returns.
    Hang,
}

type Responder = dyn Fn(&Invocation, usize) -> FakeResponse + Send + Sync;

/// In-process `ScriptHandler` for tests.
///
/// Clones share the call log, so keep one clone for assertions and register
/// another with the `ScriptRegistry`.
#[derive(Clone)]
pub struct FakeScript {
    responder: Arc<Responder>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<Invocation>>>,
    counter: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
}

impl FakeScript {
    pub fn with_responder(
        f: impl Fn(&Invocation, usize) -> FakeResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(f),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            counter: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            peak_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always exits with `code`.
    pub fn exit(code: i32) -> Self {
        Self::with_responder(move |_, _| FakeResponse::Exit(code))
    }

    /// Call `n` gets `responses[n]`; the last response repeats.
    pub fn sequence(responses: Vec<FakeResponse>) -> Self {
        assert!(!responses.is_empty(), "sequence needs at least one response");
        Self::with_responder(move |_, n| responses[n.min(responses.len() - 1)].clone())
    }

    /// Exit code chosen by the file argument: `code` if any argument ends
    /// with `suffix`, 0 otherwise.
    pub fn failing_on(suffix: &'static str, code: i32) -> Self {
        Self::with_responder(move |inv, _| {
            if inv.arguments.iter().any(|a| a.ends_with(suffix)) {
                FakeResponse::Exit(code)
            } else {
                FakeResponse::Exit(0)
            }
        })
    }

    pub fn error(msg: &str) -> Self {
        let msg = msg.to_string();
        Self::with_responder(move |_, _| FakeResponse::Error(msg.clone()))
    }

    pub fn panicking(msg: &str) -> Self {
        let msg = msg.to_string();
        Self::with_responder(move |_, _| FakeResponse::Panic(msg.clone()))
    }

    pub fn hanging() -> Self {
        Self::with_responder(|_, _| FakeResponse::Hang)
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn handler(&self) -> Arc<dyn ScriptHandler> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptHandler for FakeScript {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> HandlerFuture<'a> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(invocation.clone());

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(now, Ordering::SeqCst);
            let _guard = RunningGuard(self.running.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match (self.responder)(invocation, n) {
                FakeResponse::Exit(code) => Ok(ScriptReport::exit(code)),
                FakeResponse::Report(report) => Ok(report),
                FakeResponse::Error(msg) => Err(anyhow!(msg)),
                FakeResponse::Panic(msg) => panic!("{msg}"),
                FakeResponse::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        })
    }
}
