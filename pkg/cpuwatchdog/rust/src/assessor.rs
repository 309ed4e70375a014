// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Decides when sustained CPU overload warrants a thread dump.
//!
//! The assessor samples the usage rate once per interval and counts hits (samples
//! at or above the breach rate) inside a window of fixed length. Hits need not
//! be consecutive, so intermittent spikes under GC pressure still add up. Once
//! `hit_threshold` hits land inside one window a [`CaptureSignal`] is sent and
//! the assessor stays silent for the configured cooldown.

use crate::metrics::MetricsSource;
use log::{error, info, warn};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep};

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentConfig {
    pub hit_threshold: u32,
    pub breach_rate: f64,
    pub window: Duration,
    pub interval: Duration,
    pub silence: Duration,
}

/// Request to capture the target now. Carries nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sampling,
    Silent,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sampling => write!(f, "sampling"),
            Mode::Silent => write!(f, "silent"),
        }
    }
}

/// Result of feeding one tick to the assessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The window ran out; evidence was discarded and the sample ignored.
    WindowExpired,
    /// No sample could be fetched.
    NoSample,
    Breach { rate: f64, hits: u32 },
    Normal { rate: f64, hits: u32 },
    /// Threshold reached; the assessor is now silent.
    Fire { rate: f64 },
    /// Observed while silent; nothing changed.
    Silenced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentState {
    hits: u32,
    window_start: Instant,
    mode: Mode,
}

impl AssessmentState {
    fn new(now: Instant) -> Self {
        Self {
            hits: 0,
            window_start: now,
            mode: Mode::Sampling,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.hits = 0;
        self.window_start = now;
    }
}

pub struct Assessor {
    config: AssessmentConfig,
    state: AssessmentState,
}

impl Assessor {
    pub fn new(config: AssessmentConfig, now: Instant) -> Self {
        Self {
            config,
            state: AssessmentState::new(now),
        }
    }

    pub fn hits(&self) -> u32 {
        self.state.hits
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn window_start(&self) -> Instant {
        self.state.window_start
    }

    /// Evaluate one sample taken at `now`. Samples are ignored while silent.
    pub fn observe(&mut self, now: Instant, sample: Option<f64>) -> Outcome {
        if self.state.mode == Mode::Silent {
            return Outcome::Silenced;
        }

        if now.saturating_duration_since(self.state.window_start) >= self.config.window {
            self.state.reset(now);
            return Outcome::WindowExpired;
        }

        let Some(rate) = sample else {
            return Outcome::NoSample;
        };

        if rate < self.config.breach_rate {
            return Outcome::Normal {
                rate,
                hits: self.state.hits,
            };
        }

        self.state.hits += 1;
        if self.state.hits >= self.config.hit_threshold {
            self.state.reset(now);
            self.state.mode = Mode::Silent;
            return Outcome::Fire { rate };
        }
        Outcome::Breach {
            rate,
            hits: self.state.hits,
        }
    }

    /// Leave the silent period and open a fresh window at `now`.
    pub fn resume(&mut self, now: Instant) {
        self.state.reset(now);
        self.state.mode = Mode::Sampling;
    }

    /// Sample forever, sending a signal each time the threshold is crossed.
    /// Returns once the receiving side of `signals` is gone.
    pub async fn run<S: MetricsSource>(
        mut self,
        source: S,
        signals: mpsc::Sender<CaptureSignal>,
    ) {
        info!(
            "assessing every {}s over {}s windows: fire after {} samples >= {}%",
            self.config.interval.as_secs(),
            self.config.window.as_secs(),
            self.config.hit_threshold,
            self.config.breach_rate
        );
        loop {
            let sample = match source.fetch_rate().await {
                Ok(rate) => Some(rate),
                Err(e) => {
                    warn!("failed to fetch cpu usage rate: {e}");
                    None
                }
            };

            match self.observe(Instant::now(), sample) {
                Outcome::WindowExpired => {
                    info!(
                        "exceeded assessment window of {}s, reset",
                        self.config.window.as_secs()
                    );
                    // Evaluate again straight away in the new window.
                    continue;
                }
                Outcome::NoSample | Outcome::Silenced => {}
                Outcome::Breach { rate, hits } | Outcome::Normal { rate, hits } => {
                    self.log_rate(rate, hits);
                }
                Outcome::Fire { rate } => {
                    self.log_rate(rate, self.config.hit_threshold);
                    if signals.send(CaptureSignal).await.is_err() {
                        error!("capture dispatcher is gone, stopping assessment");
                        return;
                    }
                    info!(
                        "keep silent for about {} seconds",
                        self.config.silence.as_secs()
                    );
                    sleep(self.config.silence).await;
                    self.resume(Instant::now());
                    info!("exit silent and start assessing again");
                    continue;
                }
            }

            sleep(self.config.interval).await;
        }
    }

    fn log_rate(&self, rate: f64, hits: u32) {
        info!(
            "rate(current/alert) -> {rate:.2}/{:.2}, hits(current/alert) -> {hits}/{}",
            self.config.breach_rate, self.config.hit_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsError;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const BREACH: f64 = 90.0;
    const CALM: f64 = 10.0;

    fn config(hit_threshold: u32, window: u64, interval: u64, silence: u64) -> AssessmentConfig {
        AssessmentConfig {
            hit_threshold,
            breach_rate: 35.0,
            window: Duration::from_secs(window),
            interval: Duration::from_secs(interval),
            silence: Duration::from_secs(silence),
        }
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    /// Replays scripted samples, then repeats `fallback`. Records when each
    /// fetch happened.
    #[derive(Clone)]
    struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Option<f64>>>>,
        fallback: Option<f64>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<f64>>, fallback: Option<f64>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                fallback,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn call_offsets(&self, base: Instant) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.duration_since(base).as_secs())
                .collect()
        }
    }

    impl MetricsSource for ScriptedSource {
        async fn fetch_rate(&self) -> Result<f64, MetricsError> {
            self.calls.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            next.ok_or(MetricsError::EmptyResult)
        }
    }

    #[test]
    fn test_initial_state() {
        let now = Instant::now();
        let a = Assessor::new(config(5, 120, 15, 120), now);
        assert_eq!(a.hits(), 0);
        assert_eq!(a.mode(), Mode::Sampling);
        assert_eq!(a.window_start(), now);
    }

    #[test]
    fn test_five_breaches_inside_window_fire_once() {
        let base = Instant::now();
        let mut a = Assessor::new(config(5, 120, 15, 120), base);

        for (i, secs) in [10, 40, 70, 100].into_iter().enumerate() {
            let outcome = a.observe(at(base, secs), Some(BREACH));
            assert_eq!(
                outcome,
                Outcome::Breach {
                    rate: BREACH,
                    hits: i as u32 + 1
                }
            );
        }

        assert_eq!(
            a.observe(at(base, 115), Some(BREACH)),
            Outcome::Fire { rate: BREACH }
        );
        assert_eq!(a.hits(), 0);
        assert_eq!(a.mode(), Mode::Silent);
        assert_eq!(a.window_start(), at(base, 115));
    }

    #[test]
    fn test_window_expiry_discards_partial_evidence() {
        let base = Instant::now();
        let mut a = Assessor::new(config(5, 120, 15, 120), base);

        for secs in [10, 40, 70, 100] {
            a.observe(at(base, secs), Some(BREACH));
        }
        assert_eq!(a.hits(), 4);

        assert_eq!(
            a.observe(at(base, 120), Some(BREACH)),
            Outcome::WindowExpired
        );
        assert_eq!(a.hits(), 0);
        assert_eq!(a.mode(), Mode::Sampling);
        assert_eq!(a.window_start(), at(base, 120));

        // The new window needs the full count again.
        for secs in [121, 130, 140, 150] {
            assert!(matches!(
                a.observe(at(base, secs), Some(BREACH)),
                Outcome::Breach { .. }
            ));
        }
        assert_eq!(a.hits(), 4);
    }

    #[test]
    fn test_fetch_failure_is_neutral() {
        let base = Instant::now();
        let mut a = Assessor::new(config(3, 120, 15, 120), base);

        a.observe(at(base, 10), Some(BREACH));
        assert_eq!(a.observe(at(base, 25), None), Outcome::NoSample);
        assert_eq!(a.hits(), 1);
        assert_eq!(a.window_start(), base);

        a.observe(at(base, 40), Some(BREACH));
        assert_eq!(a.hits(), 2);
    }

    #[test]
    fn test_rate_equal_to_threshold_is_a_hit() {
        let base = Instant::now();
        let mut a = Assessor::new(config(5, 120, 15, 120), base);
        assert_eq!(
            a.observe(at(base, 1), Some(35.0)),
            Outcome::Breach {
                rate: 35.0,
                hits: 1
            }
        );
        assert_eq!(
            a.observe(at(base, 2), Some(34.99)),
            Outcome::Normal {
                rate: 34.99,
                hits: 1
            }
        );
    }

    #[test]
    fn test_non_consecutive_hits_accumulate() {
        let base = Instant::now();
        let mut a = Assessor::new(config(3, 120, 15, 120), base);
        let samples = [BREACH, CALM, CALM, BREACH, CALM, BREACH];
        let outcomes: Vec<Outcome> = samples
            .iter()
            .enumerate()
            .map(|(i, rate)| a.observe(at(base, 10 * (i as u64 + 1)), Some(*rate)))
            .collect();
        assert_eq!(outcomes.last(), Some(&Outcome::Fire { rate: BREACH }));
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Outcome::Fire { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_hits_never_exceed_threshold() {
        let base = Instant::now();
        let threshold = 4;
        let mut a = Assessor::new(config(threshold, 1_000, 1, 0), base);
        let mut fired = 0;
        for secs in 1..200 {
            let rate = if secs % 3 == 0 { CALM } else { BREACH };
            if a.mode() == Mode::Silent {
                a.resume(at(base, secs));
                continue;
            }
            if let Outcome::Fire { .. } = a.observe(at(base, secs), Some(rate)) {
                fired += 1;
                assert_eq!(a.hits(), 0);
            }
            assert!(a.hits() < threshold);
        }
        assert!(fired > 0);
    }

    #[test]
    fn test_resume_opens_fresh_window() {
        let base = Instant::now();
        let mut a = Assessor::new(config(1, 120, 15, 120), base);
        assert_eq!(
            a.observe(at(base, 5), Some(BREACH)),
            Outcome::Fire { rate: BREACH }
        );
        a.resume(at(base, 125));
        assert_eq!(a.mode(), Mode::Sampling);
        assert_eq!(a.hits(), 0);
        assert_eq!(a.window_start(), at(base, 125));
    }

    #[test]
    fn test_observe_while_silent_changes_nothing() {
        let base = Instant::now();
        let mut a = Assessor::new(config(1, 120, 15, 120), base);
        a.observe(at(base, 5), Some(BREACH));
        assert_eq!(a.mode(), Mode::Silent);

        // Even past the window length nothing resets or counts.
        for secs in [10, 200] {
            assert_eq!(a.observe(at(base, secs), Some(BREACH)), Outcome::Silenced);
            assert_eq!(a.observe(at(base, secs), None), Outcome::Silenced);
        }
        assert_eq!(a.mode(), Mode::Silent);
        assert_eq!(a.hits(), 0);
        assert_eq!(a.window_start(), at(base, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_silences_after_firing() {
        let base = Instant::now();
        let source = ScriptedSource::new(vec![], Some(BREACH));
        let (tx, mut rx) = mpsc::channel(1);
        let assessor = Assessor::new(config(3, 120, 15, 120), base);
        tokio::spawn(assessor.run(source.clone(), tx));

        rx.recv().await.unwrap();
        assert_eq!(base.elapsed(), Duration::from_secs(30));

        rx.recv().await.unwrap();
        assert_eq!(base.elapsed(), Duration::from_secs(180));

        // Nothing is sampled between 30s and 150s.
        assert_eq!(source.call_offsets(base), vec![0, 15, 30, 150, 165, 180]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_skips_sleep_after_window_expiry() {
        let base = Instant::now();
        let source = ScriptedSource::new(vec![], Some(CALM));
        let (tx, _rx) = mpsc::channel(1);
        let assessor = Assessor::new(config(5, 30, 15, 120), base);
        tokio::spawn(assessor.run(source.clone(), tx));

        sleep(Duration::from_secs(61)).await;
        assert_eq!(source.call_offsets(base), vec![0, 15, 30, 30, 45, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tolerates_fetch_failures() {
        let base = Instant::now();
        let source = ScriptedSource::new(
            vec![Some(BREACH), None, None, Some(BREACH)],
            Some(BREACH),
        );
        let (tx, mut rx) = mpsc::channel(1);
        let assessor = Assessor::new(config(3, 120, 10, 300), base);
        tokio::spawn(assessor.run(source.clone(), tx));

        rx.recv().await.unwrap();
        // Hits at 0s and 30s, failures at 10s and 20s, third hit at 40s.
        assert_eq!(base.elapsed(), Duration::from_secs(40));
        assert_eq!(source.call_offsets(base), vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_blocks_while_signal_pending() {
        let base = Instant::now();
        let source = ScriptedSource::new(vec![], Some(BREACH));
        // Held but never drained: the first signal fills the only slot.
        let (tx, _rx) = mpsc::channel(1);
        let assessor = Assessor::new(config(1, 120, 15, 10), base);
        tokio::spawn(assessor.run(source.clone(), tx));

        sleep(Duration::from_secs(1_000)).await;
        // Fired at 0s, silent until 10s, fired again and stuck on send.
        assert_eq!(source.call_offsets(base), vec![0, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_dispatcher_gone() {
        let source = ScriptedSource::new(vec![], Some(BREACH));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let assessor = Assessor::new(config(1, 120, 15, 120), Instant::now());
        tokio::time::timeout(Duration::from_secs(1), assessor.run(source, tx))
            .await
            .expect("assessor should return once the channel is closed");
    }
}
