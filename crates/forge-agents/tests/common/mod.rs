//! Instrumented stubs shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forge_agents::backend::{InferenceRequest, InferenceSession, ModelBackend, TokenStream};
use forge_agents::collaborators::{
    BuildService, CodeAnalyzer, FileGenerator, GenerationContext, RevisionRequest, TestRunner,
};
use forge_agents::errors::{ForgeError, ForgeResult, GenerationError, GenerationResult};
use forge_coordination::project::{Blueprint, GeneratedFile, ProjectFile, ProjectImplementation};
use forge_coordination::verdict::{BuildResult, CodeAnalysisResult, TestResult};
use futures::stream;
use tokio_util::sync::CancellationToken;

// ── Model backend ──────────────────────────────────────────────────────────

/// One scripted `infer` call.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(Vec<String>),
    Slow(Duration, Vec<String>),
    Fail(String),
    BreakMidStream(Vec<String>),
}

impl Script {
    pub fn reply(tokens: &[&str]) -> Self {
        Self::Reply(tokens.iter().map(|t| t.to_string()).collect())
    }

    pub fn text(text: &str) -> Self {
        Self::Reply(vec![text.to_string()])
    }

    pub fn slow(delay: Duration, text: &str) -> Self {
        Self::Slow(delay, vec![text.to_string()])
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }
}

#[derive(Default)]
pub struct StubState {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
    infer_calls: AtomicUsize,
    loads: AtomicUsize,
    /// Upcoming reloads (every load after the first) that fail.
    failing_reloads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubState {
    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Make the next `count` session reloads fail.
    pub fn fail_reloads(&self, count: usize) {
        self.failing_reloads.store(count, Ordering::SeqCst);
    }
}

pub struct StubBackend {
    state: Arc<StubState>,
}

impl StubBackend {
    /// Backend that plays `scripts` in order, then answers "ok".
    pub fn scripted(scripts: Vec<Script>) -> (Arc<dyn ModelBackend>, Arc<StubState>) {
        let state = Arc::new(StubState {
            scripts: Mutex::new(scripts.into()),
            ..StubState::default()
        });
        (
            Arc::new(Self {
                state: state.clone(),
            }),
            state,
        )
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn load(&self) -> GenerationResult<Box<dyn InferenceSession>> {
        let previous = self.state.loads.fetch_add(1, Ordering::SeqCst);
        let failing = previous > 0
            && self
                .state
                .failing_reloads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(GenerationError::Backend("load failed".into()));
        }
        Ok(Box::new(StubSession {
            state: self.state.clone(),
        }))
    }
}

struct StubSession {
    state: Arc<StubState>,
}

#[async_trait]
impl InferenceSession for StubSession {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<TokenStream> {
        let state = &self.state;
        state.infer_calls.fetch_add(1, Ordering::SeqCst);
        state.prompts.lock().unwrap().push(request.prompt.clone());
        let script = state
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text("ok"));

        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Script::Slow(delay, _) = &script {
            tokio::time::sleep(*delay).await;
        }
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let items: Vec<GenerationResult<String>> = match script {
            Script::Reply(tokens) | Script::Slow(_, tokens) => tokens.into_iter().map(Ok).collect(),
            Script::Fail(message) => return Err(GenerationError::Backend(message)),
            Script::BreakMidStream(tokens) => tokens
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(GenerationError::Stream(
                    "connection reset".into(),
                ))))
                .collect(),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

// ── Orchestrator collaborators ─────────────────────────────────────────────

pub fn context() -> GenerationContext {
    GenerationContext::new("Manage users and orders.", Blueprint::new("shop"), "rust")
}

pub fn planned(paths: &[&str]) -> Vec<ProjectFile> {
    paths
        .iter()
        .map(|p| ProjectFile::new(*p, format!("implements {p}")))
        .collect()
}

/// File generator recording concurrency, attempts, and revisions.
#[derive(Default)]
pub struct RecordingGenerator {
    pub delay: Duration,
    /// Paths whose creation always fails.
    pub broken: Vec<String>,
    /// Cancel this token when the named path is requested.
    pub cancel_on: Option<(String, CancellationToken)>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub attempts: Mutex<HashMap<String, usize>>,
    pub existing_sizes: Mutex<Vec<(String, usize)>>,
    pub revisions: Mutex<Vec<(String, &'static str)>>,
}

impl RecordingGenerator {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, path: &str) -> usize {
        self.attempts.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// `(path, files already present)` per creation call, in call order.
    pub fn existing_sizes(&self) -> Vec<(String, usize)> {
        self.existing_sizes.lock().unwrap().clone()
    }

    /// `(path, reason label)` per revision, in call order.
    pub fn revisions(&self) -> Vec<(String, &'static str)> {
        self.revisions.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileGenerator for RecordingGenerator {
    async fn create_file(
        &self,
        _ctx: &GenerationContext,
        file: &ProjectFile,
        existing: &ProjectImplementation,
        cancel: &CancellationToken,
    ) -> ForgeResult<GeneratedFile> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(file.path.clone())
            .or_default() += 1;
        self.existing_sizes
            .lock()
            .unwrap()
            .push((file.path.clone(), existing.len()));

        if let Some((path, token)) = &self.cancel_on {
            if *path == file.path {
                token.cancel();
            }
        }
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.contains(&file.path) {
            return Err(GenerationError::exhausted(3, GenerationError::EmptyResponse).into());
        }
        Ok(GeneratedFile::new(
            file.path.clone(),
            format!("// {}\npub fn generated() {{}}\n", file.path),
        ))
    }

    async fn revise_file(
        &self,
        _ctx: &GenerationContext,
        request: RevisionRequest<'_>,
        _cancel: &CancellationToken,
    ) -> ForgeResult<String> {
        let mut revisions = self.revisions.lock().unwrap();
        revisions.push((request.file.path.clone(), request.reason.label()));
        Ok(format!(
            "{}\n// revision {}\n",
            request.file.content,
            revisions.len()
        ))
    }
}

/// Plays scripted verdicts in order, repeating the last one.
pub struct Scripted<T> {
    verdicts: Mutex<VecDeque<ForgeResult<T>>>,
    last: Mutex<Option<T>>,
    calls: AtomicUsize,
}

impl<T: Clone> Scripted<T> {
    pub fn new(verdicts: Vec<ForgeResult<T>>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(verdict: T) -> Self {
        Self::new(vec![Ok(verdict)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> ForgeResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.verdicts.lock().unwrap().pop_front() {
            Some(Ok(verdict)) => {
                *self.last.lock().unwrap() = Some(verdict.clone());
                Ok(verdict)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ForgeError::collaborator("stub", "no verdict scripted")),
        }
    }
}

#[async_trait]
impl BuildService for Scripted<BuildResult> {
    async fn build(
        &self,
        _implementation: &ProjectImplementation,
        _cancel: &CancellationToken,
    ) -> ForgeResult<BuildResult> {
        self.next()
    }
}

#[async_trait]
impl TestRunner for Scripted<TestResult> {
    async fn run_tests(
        &self,
        _implementation: &ProjectImplementation,
        _cancel: &CancellationToken,
    ) -> ForgeResult<TestResult> {
        self.next()
    }
}

#[async_trait]
impl CodeAnalyzer for Scripted<CodeAnalysisResult> {
    async fn analyze(
        &self,
        _implementation: &ProjectImplementation,
        _planned: &[ProjectFile],
        _cancel: &CancellationToken,
    ) -> ForgeResult<CodeAnalysisResult> {
        self.next()
    }
}

pub fn score(value: f64) -> CodeAnalysisResult {
    CodeAnalysisResult {
        completeness_score: value,
        ..CodeAnalysisResult::default()
    }
}
