//! The resumable enrichment loop.
//!
//! Every record without a numeric `hsp` gets one fetch cycle: up to
//! `max_attempts` calls with backoff, ending either in a value or in a stored
//! failure reason. Records already holding a value are never fetched again,
//! which is what makes a restarted run pick up where the last one stopped.

use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    path::PathBuf,
    time::Duration,
};

use anyhow::Result;
use futures::FutureExt;
use indicatif::ProgressBar;
use rand::Rng;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::EnrichSettings,
    error::FetchError,
    power::IrradianceSource,
    records::{Dataset, HspState},
    retry::{with_retries, RetryPolicy, Sleeper},
    store::save_json,
};

/// Where in-progress state is persisted.
pub trait Checkpoint {
    fn save(&mut self, dataset: &Dataset) -> Result<()>;

    /// Called once after the last record.
    fn finish(&mut self, dataset: &Dataset) -> Result<()> {
        self.save(dataset)
    }
}

/// The resumable snapshot file plus the final output file.
pub struct ProgressFiles {
    pub snapshot: PathBuf,
    pub output: PathBuf,
}

impl Checkpoint for ProgressFiles {
    fn save(&mut self, dataset: &Dataset) -> Result<()> {
        save_json(&self.snapshot, dataset)
    }

    fn finish(&mut self, dataset: &Dataset) -> Result<()> {
        save_json(&self.snapshot, dataset)?;
        save_json(&self.output, dataset)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub already_done: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OK: {} | Failed: {} | Already done: {} | Total: {}",
            self.succeeded, self.failed, self.already_done, self.total
        )
    }
}

pub struct Enricher<'a, S: ?Sized, Z: ?Sized, R> {
    source: &'a S,
    sleeper: &'a Z,
    rng: R,
    policy: RetryPolicy,
    throttle: (Duration, Duration),
    checkpoint_every: usize,
    progress: ProgressBar,
}

impl<'a, S, Z, R> Enricher<'a, S, Z, R>
where
    S: IrradianceSource + ?Sized,
    Z: Sleeper + ?Sized,
    R: Rng,
{
    pub fn new(source: &'a S, sleeper: &'a Z, rng: R, settings: &EnrichSettings) -> Self {
        Enricher {
            source,
            sleeper,
            rng,
            policy: settings.retry_policy(),
            throttle: settings.throttle(),
            checkpoint_every: settings.checkpoint_every.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Brings every record to a terminal state, saving to `checkpoint` every
    /// `checkpoint_every` handled records and once at the end.
    pub async fn run<C: Checkpoint>(
        &mut self,
        dataset: &mut Dataset,
        checkpoint: &mut C,
    ) -> Result<Summary> {
        let total = dataset.len();
        let mut summary = Summary {
            total,
            ..Default::default()
        };
        let mut handled = 0usize;

        self.progress.set_length(total as u64);

        for idx in 0..total {
            let Some((key, record)) = dataset.get_index_mut(idx) else {
                break;
            };

            if record.is_done() {
                summary.already_done += 1;
                self.progress.inc(1);
                continue;
            }

            let key = key.clone();
            handled += 1;

            let reached_network = match record.coords() {
                None => {
                    let error = FetchError::MissingCoordinates;
                    warn!(%key, %error, "record skipped");
                    record.hsp = HspState::Failed(error.to_string());
                    summary.failed += 1;
                    false
                }
                Some((lat, lon)) => {
                    let span = info_span!("record", %key, idx = idx + 1, total);
                    match self.fetch(lat, lon).instrument(span).await {
                        Ok(hsp) => {
                            debug!(%key, hsp, "peak sun hours fetched");
                            record.hsp = HspState::Done(hsp);
                            summary.succeeded += 1;
                        }
                        Err(error) => {
                            warn!(%key, %error, "giving up on record");
                            record.hsp = HspState::Failed(error.to_string());
                            summary.failed += 1;
                        }
                    }
                    true
                }
            };

            self.progress.inc(1);
            self.progress.set_message(key);

            if handled % self.checkpoint_every == 0 {
                checkpoint.save(dataset)?;
                info!(handled, total, "progress saved");
            }

            if reached_network {
                self.pause().await;
            }
        }

        checkpoint.finish(dataset)?;
        self.progress.finish_with_message("Enrichment complete");

        Ok(summary)
    }

    async fn fetch(&mut self, lat: f64, lon: f64) -> Result<f64, FetchError> {
        let policy = &self.policy;
        let rng = &mut self.rng;
        let source = self.source;

        with_retries(
            policy.max_attempts,
            |attempt| policy.delay(attempt, rng.gen::<f64>()),
            self.sleeper,
            |_| async move {
                AssertUnwindSafe(source.annual_hsp(lat, lon))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(FetchError::Unexpected(panic_message(panic))))
            },
        )
        .await
    }

    async fn pause(&mut self) {
        let (base, jitter) = self.throttle;
        let delay = base + jitter.mul_f64(self.rng.gen::<f64>());

        self.sleeper.sleep(delay).await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "fetch panicked".to_string())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use anyhow::anyhow;
    use async_trait::async_trait;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        records::{CoordRecord, EnrichedRecord},
        retry::test_support::RecordingSleeper,
    };

    /// Returns the latitude as the peak sun hours value, failing for the
    /// latitudes in `failing`.
    #[derive(Default)]
    struct FakeSource {
        failing: Vec<f64>,
        calls: Mutex<Vec<f64>>,
    }

    impl FakeSource {
        fn failing(lats: &[f64]) -> Self {
            FakeSource {
                failing: lats.to_vec(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<f64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IrradianceSource for FakeSource {
        async fn annual_hsp(&self, lat: f64, _lon: f64) -> Result<f64, FetchError> {
            self.calls.lock().unwrap().push(lat);
            if self.failing.contains(&lat) {
                Err(FetchError::InsufficientData {
                    found: 3,
                    required: 10,
                })
            } else {
                Ok(lat)
            }
        }
    }

    /// Panics on its first call, then succeeds.
    struct PanickyOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IrradianceSource for PanickyOnce {
        async fn annual_hsp(&self, _lat: f64, _lon: f64) -> Result<f64, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("connection pool poisoned");
            }
            Ok(4.5)
        }
    }

    #[derive(Default)]
    struct MemoryCheckpoint {
        saves: Vec<Dataset>,
        finished: bool,
    }

    impl Checkpoint for MemoryCheckpoint {
        fn save(&mut self, dataset: &Dataset) -> Result<()> {
            self.saves.push(dataset.clone());
            Ok(())
        }

        fn finish(&mut self, dataset: &Dataset) -> Result<()> {
            self.finished = true;
            self.save(dataset)
        }
    }

    /// Persists the first checkpoint and then fails, like a process killed
    /// right after writing its snapshot.
    #[derive(Default)]
    struct CrashAfterFirstSave {
        persisted: Option<Dataset>,
    }

    impl Checkpoint for CrashAfterFirstSave {
        fn save(&mut self, dataset: &Dataset) -> Result<()> {
            self.persisted = Some(dataset.clone());
            Err(anyhow!("killed"))
        }
    }

    fn settings(max_attempts: u32, checkpoint_every: usize) -> EnrichSettings {
        EnrichSettings {
            max_attempts,
            checkpoint_every,
            ..Default::default()
        }
    }

    fn dataset(n: usize) -> Dataset {
        (0..n)
            .map(|i| {
                let record = CoordRecord {
                    departamento: "Antioquia".to_string(),
                    municipio: format!("Municipio {i}"),
                    lat: i as f64,
                    lon: -75.0,
                };
                (record.key(), EnrichedRecord::from(record))
            })
            .collect()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn should_fetch_pending_records() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(3);
        let mut checkpoint = MemoryCheckpoint::default();

        let summary = Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut checkpoint)
            .await
            .unwrap();

        assert_eq!(
            summary,
            Summary {
                total: 3,
                already_done: 0,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(data[1].hsp, HspState::Done(1.0));
        assert!(checkpoint.finished);
        assert_eq!(checkpoint.saves.len(), 1);
    }

    #[tokio::test]
    async fn should_not_fetch_done_records() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(2);
        data[0].hsp = HspState::Done(5.1);
        data[1].hsp = HspState::Done(4.2);

        let summary = Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        assert!(source.calls().is_empty());
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(summary.already_done, 2);
        assert_eq!(data[0].hsp, HspState::Done(5.1));
    }

    #[tokio::test]
    async fn should_fail_without_coordinates_and_no_request() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data: Dataset = [(
            "Cesar|La Gloria".to_string(),
            serde_json::from_value::<EnrichedRecord>(
                json!({"departamento": "Cesar", "municipio": "La Gloria", "lat": "8.6"}),
            )
            .unwrap(),
        )]
        .into_iter()
        .collect();

        let summary = Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        assert!(source.calls().is_empty());
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(summary.failed, 1);
        assert_eq!(
            data["Cesar|La Gloria"].hsp,
            HspState::Failed("missing coordinates".to_string())
        );
    }

    #[tokio::test]
    async fn should_store_last_error_after_exhausting_retries() {
        let source = FakeSource::failing(&[0.0]);
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(1);

        let summary = Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        assert_eq!(source.calls().len(), 5);
        assert_eq!(summary.failed, 1);

        let written = serde_json::to_value(&data[0]).unwrap();
        assert_eq!(written["hsp"], Value::Null);
        let reason = written["error_hsp"].as_str().unwrap();
        assert!(reason.contains("insufficient monthly data"));

        // four backoff sleeps between five attempts, then the throttle
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 5);
        assert!(sleeps[3] > sleeps[0]);
    }

    #[tokio::test]
    async fn should_throttle_within_jitter_window() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(4);

        Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 4);
        for sleep in sleeps {
            assert!(sleep >= Duration::from_millis(350));
            assert!(sleep < Duration::from_millis(600));
        }
    }

    #[tokio::test]
    async fn should_clear_previous_error_on_success() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(1);
        data[0].hsp = HspState::Failed("request failed: timeout".to_string());

        Enricher::new(&source, &sleeper, rng(), &settings(5, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        assert_eq!(source.calls(), vec![0.0]);
        let written = serde_json::to_value(&data[0]).unwrap();
        assert_eq!(written["hsp"], json!(0.0));
        assert!(written.get("error_hsp").is_none());
    }

    #[tokio::test]
    async fn should_checkpoint_every_batch() {
        let source = FakeSource::default();
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(5);
        data[0].hsp = HspState::Done(1.0);
        let mut checkpoint = MemoryCheckpoint::default();

        Enricher::new(&source, &sleeper, rng(), &settings(5, 2))
            .run(&mut data, &mut checkpoint)
            .await
            .unwrap();

        // after handled records 2 and 4, then the final save
        assert_eq!(checkpoint.saves.len(), 3);
        let first = &checkpoint.saves[0];
        assert!(first[1].is_done() && first[2].is_done());
        assert_eq!(first[3].hsp, HspState::Pending);
    }

    #[tokio::test]
    async fn should_fold_panics_into_retries() {
        let source = PanickyOnce {
            calls: AtomicUsize::new(0),
        };
        let sleeper = RecordingSleeper::default();
        let mut data = dataset(1);

        let summary = Enricher::new(&source, &sleeper, rng(), &settings(3, 25))
            .run(&mut data, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(data[0].hsp, HspState::Done(4.5));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn should_resume_after_interruption() {
        let sleeper = RecordingSleeper::default();

        // First run: latitude 3 keeps failing, the process dies right after
        // its first checkpoint at 25 records.
        let first_source = FakeSource::failing(&[3.0]);
        let mut data = dataset(100);
        let mut crash = CrashAfterFirstSave::default();
        let result = Enricher::new(&first_source, &sleeper, rng(), &settings(2, 25))
            .run(&mut data, &mut crash)
            .await;
        assert!(result.is_err());
        assert_eq!(first_source.calls().len(), 26);

        // What the snapshot file would hold.
        let persisted = crash.persisted.unwrap();
        let text = serde_json::to_string(&persisted).unwrap();
        let mut resumed: Dataset = serde_json::from_str(&text).unwrap();
        assert_eq!(resumed.values().filter(|r| r.is_done()).count(), 24);
        assert!(matches!(resumed[3].hsp, HspState::Failed(_)));

        // Second run picks up from the snapshot.
        let second_source = FakeSource::default();
        let summary = Enricher::new(&second_source, &sleeper, rng(), &settings(2, 25))
            .run(&mut resumed, &mut MemoryCheckpoint::default())
            .await
            .unwrap();

        let calls = second_source.calls();
        assert_eq!(calls.len(), 76);
        assert!(calls.contains(&3.0));
        assert!(!calls.iter().any(|&lat| lat < 25.0 && lat != 3.0));
        assert_eq!(
            summary,
            Summary {
                total: 100,
                already_done: 24,
                succeeded: 76,
                failed: 0
            }
        );
        assert!(resumed.values().all(|r| r.is_done()));
    }

    #[test]
    fn should_describe_panic_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42)), "fetch panicked");
    }
}
