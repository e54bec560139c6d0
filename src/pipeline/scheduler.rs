//! Playback admission and scheduling.
//!
//! Admission runs synchronously per batch: normalize and dedup, resolve against
//! the mapping, debounce per id, cap the voice count. Scheduling then fans out
//! asset loads and starts the admitted voices in decode order with a linear
//! stereo spread and a fixed onset stagger. One failing asset or voice never
//! silences the rest.

use crate::assets::cache::{AssetCache, LoadResult};
use crate::defaults;
use crate::feedback::FeedbackSink;
use crate::mapping::{FigureRecord, MappingStore};
use crate::pipeline::error::ErrorReporter;
use crate::pipeline::types::{Admission, Frame, PlaybackReport};
use crate::playback::voice::{Voice, VoicePlayer};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Live-updatable debounce interval shared with the operator console.
#[derive(Debug, Clone)]
pub struct DebounceControl(Arc<RwLock<Duration>>);

impl DebounceControl {
    pub fn new(interval: Duration) -> Self {
        Self(Arc::new(RwLock::new(interval)))
    }

    pub fn get(&self) -> Duration {
        self.0
            .read()
            .map(|d| *d)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    pub fn set(&self, interval: Duration) {
        match self.0.write() {
            Ok(mut d) => *d = interval,
            Err(poisoned) => *poisoned.into_inner() = interval,
        }
        tracing::info!(debounce_ms = interval.as_millis() as u64, "debounce interval updated");
    }
}

impl Default for DebounceControl {
    fn default() -> Self {
        Self::new(defaults::debounce())
    }
}

/// Fixed scheduling parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Voice cap per batch.
    pub max_voices: usize,
    /// Onset offset between consecutive voices of one batch.
    pub stagger: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_voices: defaults::MAX_VOICES,
            stagger: defaults::stagger(),
        }
    }
}

/// Pan for voice `index` of `count`: linear from -1 (left) to +1 (right),
/// centered when there is only one voice.
pub fn pan_for(index: usize, count: usize) -> f32 {
    if count <= 1 {
        return 0.0;
    }
    index as f32 / (count - 1) as f32 * 2.0 - 1.0
}

/// Last accepted trigger per figure id.
#[derive(Debug, Default)]
pub struct DebounceTable {
    last: HashMap<String, Instant>,
}

impl DebounceTable {
    /// Accept `id` if its last trigger is at least `interval` old, recording `now`.
    pub fn try_accept(&mut self, id: &str, now: Instant, interval: Duration) -> bool {
        if let Some(last) = self.last.get(id)
            && now.saturating_duration_since(*last) < interval
        {
            return false;
        }
        self.last.insert(id.to_string(), now);
        true
    }

    pub fn last_trigger(&self, id: &str) -> Option<Instant> {
        self.last.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

/// Collaborators needed to turn admitted records into sound.
#[derive(Clone)]
pub struct PlaybackContext {
    pub cache: AssetCache,
    pub player: Arc<dyn VoicePlayer>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub stagger: Duration,
}

impl PlaybackContext {
    /// Load every admitted asset concurrently, then schedule the voices in
    /// admission order.
    ///
    /// Voices keep their admission slot for pan and onset even when a sibling
    /// fails. A slow load holds back the batch rather than letting later voices
    /// start ahead of it.
    pub async fn play(&self, admitted: Vec<Arc<FigureRecord>>, reference: Instant) -> PlaybackReport {
        let loads = join_all(
            admitted
                .iter()
                .map(|record| self.cache.ensure_loaded(&record.sound_ref)),
        )
        .await;

        let count = admitted.len();
        let mut report = PlaybackReport::default();
        for (index, (record, loaded)) in admitted.into_iter().zip(loads).enumerate() {
            let pan = pan_for(index, count);
            let offset = self.stagger * index as u32;
            match self.schedule(record, loaded, pan, reference, offset) {
                VoiceOutcome::Played(id) => report.played.push(id),
                VoiceOutcome::AssetFailed(e) => report.asset_failures.push(e),
                VoiceOutcome::PlaybackFailed => report.playback_failures += 1,
            }
        }
        report
    }

    fn schedule(
        &self,
        record: Arc<FigureRecord>,
        loaded: LoadResult,
        pan: f32,
        reference: Instant,
        offset: Duration,
    ) -> VoiceOutcome {
        let buffer = match loaded {
            Ok(buffer) => buffer,
            Err(e) => {
                self.reporter.report("asset", &e);
                return VoiceOutcome::AssetFailed(e);
            }
        };

        let voice = Voice {
            asset: record.sound_ref.clone(),
            buffer,
            pan,
            reference,
            offset,
        };
        match self.player.play(voice) {
            Ok(()) => {
                tracing::debug!(
                    id = %record.id,
                    pan,
                    offset_ms = offset.as_millis() as u64,
                    "voice scheduled"
                );
                self.feedback.show(&record.label, &record.role);
                VoiceOutcome::Played(record.id.clone())
            }
            Err(e) => {
                self.reporter.report("playback", &e);
                VoiceOutcome::PlaybackFailed
            }
        }
    }
}

enum VoiceOutcome {
    Played(String),
    AssetFailed(crate::error::AssetLoadError),
    PlaybackFailed,
}

/// Admission state plus playback collaborators.
pub struct PlaybackScheduler {
    mapping: Arc<MappingStore>,
    debounce: DebounceControl,
    table: DebounceTable,
    config: SchedulerConfig,
    context: PlaybackContext,
}

impl PlaybackScheduler {
    pub fn new(
        mapping: Arc<MappingStore>,
        debounce: DebounceControl,
        config: SchedulerConfig,
        context: PlaybackContext,
    ) -> Self {
        Self {
            mapping,
            debounce,
            table: DebounceTable::default(),
            config,
            context,
        }
    }

    pub fn debounce_table(&self) -> &DebounceTable {
        &self.table
    }

    /// Decide which codes of `batch` get a voice.
    ///
    /// The debounce timestamp is written here, at admission, so a batch that
    /// arrives while an earlier voice is still loading cannot re-admit the id.
    pub fn admit(&mut self, batch: &[String], now: Instant) -> Admission {
        let interval = self.debounce.get();
        let mut seen = HashSet::new();
        let mut admission = Admission::default();
        let mut accepted = Vec::new();

        for raw in batch {
            let code = raw.trim();
            if code.is_empty() || !seen.insert(code) {
                continue;
            }
            let Some(record) = self.mapping.get(code) else {
                admission.unknown += 1;
                continue;
            };
            if !self.table.try_accept(code, now, interval) {
                admission.debounced += 1;
                continue;
            }
            accepted.push(Arc::clone(record));
        }

        if accepted.len() > self.config.max_voices {
            admission.overflow = accepted.len() - self.config.max_voices;
            accepted.truncate(self.config.max_voices);
        }
        admission.admitted = accepted;

        if admission.debounced > 0 || admission.overflow > 0 || admission.unknown > 0 {
            tracing::debug!(
                unknown = admission.unknown,
                debounced = admission.debounced,
                overflow = admission.overflow,
                "codes dropped"
            );
        }
        admission
    }

    /// Admit a batch and play it to completion.
    pub async fn admit_and_play(&mut self, batch: &[String]) -> PlaybackReport {
        let now = Instant::now();
        let admission = self.admit(batch, now);
        if admission.is_empty() {
            return PlaybackReport::default();
        }
        tracing::info!(ids = ?admission.ids(), "batch admitted");
        self.context.play(admission.admitted, now).await
    }

    /// Runs the scheduler station until the input closes.
    ///
    /// Admission happens in frame order on this task; loading and playback of
    /// each batch run on their own task so a slow asset never delays the
    /// admission of later frames.
    pub async fn run(mut self, mut input: mpsc::Receiver<Frame>) {
        while let Some(frame) = input.recv().await {
            let now = Instant::now();
            let admission = self.admit(&frame.codes, now);
            if admission.is_empty() {
                continue;
            }
            tracing::info!(
                frame = frame.sequence,
                ids = ?admission.ids(),
                "batch admitted"
            );

            let context = self.context.clone();
            let sequence = frame.sequence;
            tokio::spawn(async move {
                let report = context.play(admission.admitted, now).await;
                tracing::debug!(
                    frame = sequence,
                    played = report.played.len(),
                    asset_failures = report.asset_failures.len(),
                    playback_failures = report.playback_failures,
                    "batch finished"
                );
            });
        }
        tracing::debug!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::decode::tests::make_wav_data;
    use crate::assets::fetch::MockFetcher;
    use crate::feedback::CollectorFeedback;
    use crate::pipeline::error::CollectingReporter;
    use crate::playback::voice::RecordingPlayer;

    fn record(id: &str, label: &str, sound: &str) -> FigureRecord {
        FigureRecord {
            id: id.to_string(),
            label: label.to_string(),
            role: "Animal".to_string(),
            sound_ref: sound.to_string(),
        }
    }

    fn batch(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    struct Harness {
        scheduler: PlaybackScheduler,
        player: Arc<RecordingPlayer>,
        feedback: Arc<CollectorFeedback>,
        reporter: Arc<CollectingReporter>,
        fetcher: Arc<MockFetcher>,
    }

    fn harness_with(
        records: Vec<FigureRecord>,
        fetcher: MockFetcher,
        player: RecordingPlayer,
        config: SchedulerConfig,
    ) -> Harness {
        let fetcher = Arc::new(fetcher);
        let player = Arc::new(player);
        let feedback = Arc::new(CollectorFeedback::new());
        let reporter = Arc::new(CollectingReporter::new());
        let context = PlaybackContext {
            cache: AssetCache::new(fetcher.clone()),
            player: player.clone(),
            feedback: feedback.clone(),
            reporter: reporter.clone(),
            stagger: config.stagger,
        };
        let scheduler = PlaybackScheduler::new(
            Arc::new(MappingStore::from_records(records)),
            DebounceControl::default(),
            config,
            context,
        );
        Harness {
            scheduler,
            player,
            feedback,
            reporter,
            fetcher,
        }
    }

    fn zoo(n: usize) -> (Vec<FigureRecord>, MockFetcher) {
        let wav = make_wav_data(48000, 1, &[2000i16; 480]);
        let mut fetcher = MockFetcher::new();
        let mut records = Vec::new();
        for i in 0..n {
            let sound = format!("s{}.wav", i);
            fetcher = fetcher.with_asset(&sound, wav.clone());
            records.push(record(&format!("id-{}", i), &format!("L{}", i), &sound));
        }
        (records, fetcher)
    }

    fn harness(n: usize) -> Harness {
        let (records, fetcher) = zoo(n);
        harness_with(
            records,
            fetcher,
            RecordingPlayer::new(),
            SchedulerConfig::default(),
        )
    }

    #[test]
    fn test_pan_for_spreads_linearly() {
        assert_eq!(pan_for(0, 1), 0.0);
        assert_eq!(pan_for(0, 2), -1.0);
        assert_eq!(pan_for(1, 2), 1.0);
        assert_eq!(pan_for(0, 5), -1.0);
        assert_eq!(pan_for(2, 5), 0.0);
        assert_eq!(pan_for(4, 5), 1.0);
        assert!((pan_for(1, 5) - -0.5).abs() < 1e-6);
    }

    #[test]
    fn test_debounce_table_window() {
        let mut table = DebounceTable::default();
        let t0 = Instant::now();
        let d = Duration::from_millis(250);

        assert!(table.try_accept("a", t0, d));
        assert!(!table.try_accept("a", t0, d));
        assert!(!table.try_accept("a", t0 + Duration::from_millis(249), d));
        assert!(table.try_accept("a", t0 + Duration::from_millis(250), d));
        assert_eq!(
            table.last_trigger("a"),
            Some(t0 + Duration::from_millis(250))
        );
        // Independent ids do not interfere
        assert!(table.try_accept("b", t0 + Duration::from_millis(251), d));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_debounce_control_is_shared() {
        let control = DebounceControl::default();
        let other = control.clone();
        assert_eq!(control.get(), Duration::from_millis(250));

        other.set(Duration::from_millis(400));
        assert_eq!(control.get(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_admit_dedups_within_batch_preserving_order() {
        let mut h = harness(3);
        let now = Instant::now();

        let admission = h.scheduler.admit(
            &batch(&["id-2", " id-0 ", "id-2", "", "id-0", "id-1"]),
            now,
        );

        assert_eq!(admission.ids(), vec!["id-2", "id-0", "id-1"]);
    }

    #[tokio::test]
    async fn test_admit_drops_unknown_codes() {
        let mut h = harness(1);
        let admission = h
            .scheduler
            .admit(&batch(&["nope", "id-0", "nope"]), Instant::now());

        assert_eq!(admission.ids(), vec!["id-0"]);
        assert_eq!(admission.unknown, 1);
        // Unknown ids never enter the debounce table
        assert_eq!(h.scheduler.debounce_table().len(), 1);
    }

    #[tokio::test]
    async fn test_admit_debounces_across_batches() {
        let mut h = harness(1);
        let t0 = Instant::now();

        assert_eq!(h.scheduler.admit(&batch(&["id-0"]), t0).admitted.len(), 1);

        let second = h
            .scheduler
            .admit(&batch(&["id-0"]), t0 + Duration::from_millis(100));
        assert!(second.is_empty());
        assert_eq!(second.debounced, 1);

        let third = h
            .scheduler
            .admit(&batch(&["id-0"]), t0 + Duration::from_millis(300));
        assert_eq!(third.ids(), vec!["id-0"]);
    }

    #[tokio::test]
    async fn test_rejected_batch_does_not_refresh_timestamp() {
        let mut h = harness(1);
        let t0 = Instant::now();

        h.scheduler.admit(&batch(&["id-0"]), t0);
        h.scheduler
            .admit(&batch(&["id-0"]), t0 + Duration::from_millis(200));

        let later = h
            .scheduler
            .admit(&batch(&["id-0"]), t0 + Duration::from_millis(260));
        assert_eq!(later.ids(), vec!["id-0"]);
    }

    #[tokio::test]
    async fn test_runtime_debounce_change_applies_to_next_batch() {
        let mut h = harness(1);
        let t0 = Instant::now();
        h.scheduler.admit(&batch(&["id-0"]), t0);

        h.scheduler.debounce.set(Duration::from_millis(50));
        let admission = h
            .scheduler
            .admit(&batch(&["id-0"]), t0 + Duration::from_millis(60));
        assert_eq!(admission.ids(), vec!["id-0"]);
    }

    #[tokio::test]
    async fn test_voice_cap_keeps_first_in_decode_order() {
        let mut h = harness(13);
        let codes: Vec<String> = (0..13).map(|i| format!("id-{}", i)).collect();

        let admission = h.scheduler.admit(&codes, Instant::now());

        assert_eq!(admission.admitted.len(), 10);
        assert_eq!(admission.overflow, 3);
        let expected: Vec<String> = (0..10).map(|i| format!("id-{}", i)).collect();
        assert_eq!(admission.ids(), expected);
    }

    #[tokio::test]
    async fn test_single_voice_is_centered() {
        let mut h = harness(1);

        let report = h
            .scheduler
            .admit_and_play(&batch(&["id-0", "id-0", "id-0"]))
            .await;

        assert_eq!(report.played, vec!["id-0"]);
        let played = h.player.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].pan, 0.0);
        assert_eq!(played[0].offset, Duration::ZERO);
        assert_eq!(h.feedback.entries(), vec!["L0 (Animal)"]);
    }

    #[tokio::test]
    async fn test_voices_fan_out_in_space_and_time() {
        let mut h = harness(3);

        h.scheduler
            .admit_and_play(&batch(&["id-0", "id-1", "id-2"]))
            .await;

        let played = h.player.played();
        let pans: Vec<f32> = played.iter().map(|v| v.pan).collect();
        let offsets: Vec<u128> = played.iter().map(|v| v.offset.as_millis()).collect();
        assert_eq!(pans, vec![-1.0, 0.0, 1.0]);
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(h.player.played_assets(), vec!["s0.wav", "s1.wav", "s2.wav"]);
        // All voices share one reference time
        assert!(played.iter().all(|v| v.reference == played[0].reference));
    }

    #[tokio::test]
    async fn test_failed_asset_does_not_silence_siblings() {
        let (records, fetcher) = zoo(3);
        let fetcher = fetcher.with_failure("s1.wav");
        let mut h = harness_with(
            records,
            fetcher,
            RecordingPlayer::new(),
            SchedulerConfig::default(),
        );

        let report = h
            .scheduler
            .admit_and_play(&batch(&["id-0", "id-1", "id-2"]))
            .await;

        assert_eq!(report.played, vec!["id-0", "id-2"]);
        assert_eq!(report.asset_failures.len(), 1);
        assert_eq!(report.asset_failures[0].asset(), "s1.wav");
        // Surviving voices keep their admission slot
        let pans: Vec<f32> = h.player.played().iter().map(|v| v.pan).collect();
        assert_eq!(pans, vec![-1.0, 1.0]);
        assert_eq!(h.feedback.entries(), vec!["L0 (Animal)", "L2 (Animal)"]);
        assert_eq!(h.reporter.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_voice_is_reported_and_siblings_play() {
        let (records, fetcher) = zoo(3);
        let mut h = harness_with(
            records,
            fetcher,
            RecordingPlayer::new().with_failure("s0.wav"),
            SchedulerConfig::default(),
        );

        let report = h
            .scheduler
            .admit_and_play(&batch(&["id-0", "id-1", "id-2"]))
            .await;

        assert_eq!(report.played, vec!["id-1", "id-2"]);
        assert_eq!(report.playback_failures, 1);
        let reports = h.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("playback:"));
    }

    #[tokio::test]
    async fn test_same_asset_in_batch_loads_once() {
        let wav = make_wav_data(48000, 1, &[2000i16; 480]);
        let records = vec![
            record("a", "A", "shared.wav"),
            record("b", "B", "shared.wav"),
        ];
        let fetcher = MockFetcher::new()
            .with_asset("shared.wav", wav)
            .with_delay(Duration::from_millis(5));
        let mut h = harness_with(
            records,
            fetcher,
            RecordingPlayer::new(),
            SchedulerConfig::default(),
        );

        let report = h.scheduler.admit_and_play(&batch(&["a", "b"])).await;

        assert_eq!(report.played, vec!["a", "b"]);
        assert_eq!(h.fetcher.fetch_count("shared.wav"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_first_asset_keeps_decode_order() {
        let wav = make_wav_data(48000, 1, &[2000i16; 480]);
        let records = vec![record("a", "A", "a.wav"), record("b", "B", "b.wav")];
        let fetcher = MockFetcher::new()
            .with_asset("a.wav", wav.clone())
            .with_asset("b.wav", wav)
            .with_asset_delay("a.wav", Duration::from_millis(40));
        let mut h = harness_with(
            records,
            fetcher,
            RecordingPlayer::new(),
            SchedulerConfig::default(),
        );

        let report = h.scheduler.admit_and_play(&batch(&["a", "b"])).await;

        assert_eq!(report.played, vec!["a", "b"]);
        assert_eq!(h.player.played_assets(), vec!["a.wav", "b.wav"]);
        assert_eq!(h.feedback.entries(), vec!["A (Animal)", "B (Animal)"]);
        let offsets: Vec<u128> = h
            .player
            .played()
            .iter()
            .map(|v| v.offset.as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 12]);
    }

    #[tokio::test]
    async fn test_empty_admission_plays_nothing() {
        let mut h = harness(1);
        let report = h.scheduler.admit_and_play(&batch(&["unknown"])).await;

        assert!(report.played.is_empty());
        assert!(h.player.played().is_empty());
        assert_eq!(h.fetcher.total_fetches(), 0);
    }

    #[tokio::test]
    async fn test_run_admits_frames_and_plays() {
        let h = harness(2);
        let player = h.player.clone();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(h.scheduler.run(rx));

        tx.send(Frame::new(batch(&["id-0", "id-1"]), 0, Instant::now()))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        // Playback runs on spawned tasks; give them a moment to finish
        for _ in 0..50 {
            if player.played().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(player.played_assets(), vec!["s0.wav", "s1.wav"]);
    }
}
