//! Filler utterances that mask response latency.
//!
//! While the agent is reasoning, a [`FillerManager`] waits an initial delay
//! and then speaks a short acknowledgement ("そうですね", "確認しています"),
//! repeating under the `waiting` context until stopped. Each manager belongs
//! to one call.
//!
//! State machine: `Idle -> Scheduled -> Playing -> Scheduled ...`, with
//! [`FillerManager::stop`] returning to `Idle` from anywhere. Every scheduled
//! run carries the generation it was started under; once `stop` or a new
//! `start` bumps the generation, a stale run can neither emit audio nor touch
//! state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use popline_types::{AudioFrame, FillerContext};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;

use crate::tts::SpeechSynthesizer;

/// Receives outbound filler frames.
pub type AudioSink = Arc<dyn Fn(AudioFrame) + Send + Sync>;

const THINKING: &[&str] = &["かしこまりました", "そうですね", "ありがとうございます"];
const SEARCHING: &[&str] = &["お調べしています", "確認しています", "ただいま検索中です"];
const PROCESSING: &[&str] = &["処理しています", "準備しています"];
const WAITING: &[&str] = &[
    "もう少々お待ちください",
    "申し訳ございません、お待たせしています",
];

/// Phrase pool for a context.
pub fn phrases(context: FillerContext) -> &'static [&'static str] {
    match context {
        FillerContext::Thinking => THINKING,
        FillerContext::Searching => SEARCHING,
        FillerContext::Processing => PROCESSING,
        FillerContext::Waiting => WAITING,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillerTiming {
    pub initial_delay: Duration,
    pub repeat_interval: Duration,
}

impl Default for FillerTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2000),
            repeat_interval: Duration::from_millis(4000),
        }
    }
}

/// Rotating phrase selection.
///
/// Draws unused phrases until a pool is exhausted, then forgets what was
/// used and draws at random.
#[derive(Debug, Default)]
pub struct FillerPicker {
    used: HashSet<&'static str>,
}

impl FillerPicker {
    pub fn pick<R: Rng + ?Sized>(&mut self, context: FillerContext, rng: &mut R) -> &'static str {
        let pool = phrases(context);
        let unused: Vec<&'static str> = pool
            .iter()
            .copied()
            .filter(|p| !self.used.contains(p))
            .collect();

        let choice = match unused.choose(rng) {
            Some(p) => *p,
            None => {
                self.used.clear();
                pool.choose(rng).copied().unwrap_or_default()
            }
        };
        self.used.insert(choice);
        choice
    }

    pub fn clear(&mut self) {
        self.used.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillerState {
    Idle,
    Scheduled,
    Playing,
}

struct Inner {
    state: FillerState,
    context: FillerContext,
    picker: FillerPicker,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Per-call filler scheduler. Clones share state.
#[derive(Clone)]
pub struct FillerManager {
    inner: Arc<Mutex<Inner>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: AudioSink,
    timing: FillerTiming,
}

impl FillerManager {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sink: AudioSink, timing: FillerTiming) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: FillerState::Idle,
                context: FillerContext::Thinking,
                picker: FillerPicker::default(),
                generation: 0,
                task: None,
            })),
            synthesizer,
            sink,
            timing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> FillerState {
        self.lock().state
    }

    pub fn context(&self) -> FillerContext {
        self.lock().context
    }

    /// Schedules a filler after the initial delay, replacing any pending
    /// one. While a filler is playing only the context is updated.
    pub fn start(&self, context: FillerContext) {
        let mut inner = self.lock();
        inner.context = context;
        if inner.state == FillerState::Playing {
            return;
        }

        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        inner.state = FillerState::Scheduled;
        let generation = inner.generation;
        inner.task = Some(tokio::spawn(self.clone().run(generation)));
        tracing::debug!(context = context.as_str(), "filler scheduled");
    }

    /// Cancels any pending or playing filler.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.state = FillerState::Idle;
    }

    /// Plays one filler now, bypassing the delay. No-op while one is playing.
    pub async fn play_immediate(&self, context: FillerContext) {
        let (phrase, generation) = {
            let mut inner = self.lock();
            inner.context = context;
            if inner.state == FillerState::Playing {
                return;
            }
            inner.state = FillerState::Playing;
            let phrase = inner.picker.pick(context, &mut rand::thread_rng());
            (phrase, inner.generation)
        };

        self.play(phrase, generation).await;

        let mut inner = self.lock();
        if inner.generation == generation && inner.state == FillerState::Playing {
            inner.state = if inner.task.is_some() {
                FillerState::Scheduled
            } else {
                FillerState::Idle
            };
        }
    }

    /// Stops and forgets used phrases.
    pub fn reset(&self) {
        self.stop();
        let mut inner = self.lock();
        inner.picker.clear();
        inner.context = FillerContext::Thinking;
    }

    async fn run(self, generation: u64) {
        let mut delay = self.timing.initial_delay;
        loop {
            tokio::time::sleep(delay).await;

            let phrase = {
                let mut inner = self.lock();
                if inner.generation != generation {
                    return;
                }
                // an immediate filler is already on the line
                if inner.state == FillerState::Playing {
                    None
                } else {
                    inner.state = FillerState::Playing;
                    let context = inner.context;
                    Some(inner.picker.pick(context, &mut rand::thread_rng()))
                }
            };
            let Some(phrase) = phrase else {
                delay = self.timing.repeat_interval;
                continue;
            };

            self.play(phrase, generation).await;

            {
                let mut inner = self.lock();
                if inner.generation != generation {
                    return;
                }
                inner.context = FillerContext::Waiting;
                inner.state = FillerState::Scheduled;
            }
            delay = self.timing.repeat_interval;
        }
    }

    async fn play(&self, phrase: &'static str, generation: u64) {
        tracing::debug!(phrase, "playing filler");
        let inner = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let mut forward = move |frame: AudioFrame| {
            let current = inner
                .lock()
                .map(|i| i.generation == generation)
                .unwrap_or(false);
            if current {
                sink(frame);
            }
        };

        if let Err(e) = self.synthesizer.synthesize_stream(phrase, &mut forward).await {
            tracing::warn!(error = %e, phrase, "filler synthesis failed");
        }
    }
}
