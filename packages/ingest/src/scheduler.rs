//! Windowed fan-out of tile lookups.
//!
//! A batch of tiles is split into consecutive windows of
//! [`IngestConfig::concurrency`] tiles. Every lookup in a window runs
//! concurrently and the window only completes once all of them have
//! settled, so one failing tile never cancels or delays its siblings beyond
//! the window boundary. Windows run strictly one after another, each
//! followed by [`IngestConfig::window_pause`].

use std::sync::Arc;

use airviz_air_quality::progress::ProgressCallback;
use airviz_air_quality::retry::{RetryPolicy, lookup_with_retry};
use airviz_air_quality::{AirQualityError, AirQualityLookup};
use airviz_air_quality_models::Tile;
use airviz_ingest_models::{FetchedTile, IngestConfig};
use futures::stream::{self, StreamExt as _};

/// Final result of looking up one tile.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The lookup succeeded, possibly after retries.
    Success(FetchedTile),
    /// The lookup failed fatally or ran out of attempts.
    Failure {
        /// The tile that could not be fetched.
        tile: Tile,
        /// The last error seen.
        error: AirQualityError,
    },
}

/// Builds the per-tile retry policy from `config`.
#[must_use]
pub const fn retry_policy(config: &IngestConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.max_attempts,
        base_delay: config.base_backoff,
    }
}

/// Looks up every tile of `window` concurrently and waits for all of them.
///
/// Outcomes are returned in completion order. `progress` advances by one as
/// each tile settles.
pub async fn fetch_window<L>(
    lookup: &L,
    window: &[Tile],
    policy: RetryPolicy,
    progress: &Arc<dyn ProgressCallback>,
) -> Vec<FetchOutcome>
where
    L: AirQualityLookup + ?Sized,
{
    stream::iter(window.iter().map(|&tile| async move {
        let outcome = match lookup_with_retry(lookup, tile.latitude, tile.longitude, policy).await
        {
            Ok(response) => FetchOutcome::Success(FetchedTile { tile, response }),
            Err(error) => FetchOutcome::Failure { tile, error },
        };
        progress.inc(1);
        outcome
    }))
    .buffer_unordered(window.len().max(1))
    .collect()
    .await
}

/// Fetches every tile of one outer batch, window by window.
///
/// Failed tiles are logged and dropped; only successful lookups are
/// returned. They are grouped by window but carry no ordering within one.
pub async fn run_batch<L>(
    lookup: &L,
    tiles: &[Tile],
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Vec<FetchedTile>
where
    L: AirQualityLookup + ?Sized,
{
    let policy = retry_policy(config);
    let mut fetched = Vec::with_capacity(tiles.len());

    for (index, window) in tiles.chunks(config.concurrency.max(1)).enumerate() {
        log::debug!("Fetching window {index} ({} tiles)", window.len());

        for outcome in fetch_window(lookup, window, policy, progress).await {
            match outcome {
                FetchOutcome::Success(tile) => fetched.push(tile),
                FetchOutcome::Failure { tile, error } => {
                    log::error!(
                        "Dropping tile {} at ({}, {}): {error}",
                        tile.id,
                        tile.latitude,
                        tile.longitude
                    );
                }
            }
        }

        tokio::time::sleep(config.window_pause).await;
    }

    fetched
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use airviz_air_quality::progress::null_progress;
    use airviz_air_quality_models::AirQualityResponse;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::test_support::{api_error, sample_response};

    /// Fails fatally for the listed coordinates (keyed by latitude), takes
    /// `latency(latitude)` to answer, and records when each call ran.
    struct FakeLookup {
        fatal: Vec<f64>,
        latency: fn(f64) -> Duration,
        calls: Mutex<BTreeMap<i64, (Instant, Instant)>>,
    }

    impl FakeLookup {
        fn new(fatal: Vec<f64>, latency: fn(f64) -> Duration) -> Self {
            Self {
                fatal,
                latency,
                calls: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl AirQualityLookup for FakeLookup {
        async fn lookup(
            &self,
            latitude: f64,
            _longitude: f64,
        ) -> Result<AirQualityResponse, AirQualityError> {
            let started = Instant::now();
            tokio::time::sleep((self.latency)(latitude)).await;
            #[allow(clippy::cast_possible_truncation)]
            self.calls
                .lock()
                .unwrap()
                .insert(latitude as i64, (started, Instant::now()));

            if self.fatal.contains(&latitude) {
                Err(api_error(400, "API key not valid"))
            } else {
                Ok(sample_response())
            }
        }
    }

    fn tiles(n: i32) -> Vec<Tile> {
        (0..n).map(|i| Tile::new(i, f64::from(i), 0.0)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tiles_do_not_block_their_window() {
        let lookup = FakeLookup::new(vec![1.0, 4.0, 7.0], |_| Duration::from_millis(20));
        let config = IngestConfig::default();

        let fetched = run_batch(&lookup, &tiles(10), &config, &null_progress()).await;

        let mut ids: Vec<i32> = fetched.iter().map(|f| f.tile.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 2, 3, 5, 6, 8, 9]);
        assert_eq!(lookup.calls.lock().unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn window_lookups_run_concurrently() {
        let lookup = FakeLookup::new(vec![], |_| Duration::from_millis(100));
        let policy = retry_policy(&IngestConfig::default());
        let start = Instant::now();

        let outcomes = fetch_window(&lookup, &tiles(10), policy, &null_progress()).await;

        assert_eq!(outcomes.len(), 10);
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o, FetchOutcome::Success(_)))
        );
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[derive(Default)]
    struct Settled(AtomicU64);

    impl ProgressCallback for Settled {
        fn set_total(&self, _total: u64) {}

        fn inc(&self, delta: u64) {
            self.0.fetch_add(delta, Ordering::SeqCst);
        }

        fn set_message(&self, _msg: String) {}

        fn finish(&self, _msg: String) {}
    }

    #[tokio::test(start_paused = true)]
    async fn progress_advances_as_each_tile_settles() {
        let lookup = FakeLookup::new(vec![1.0], |lat| {
            Duration::from_millis(if lat < 0.5 { 10 } else { 100 })
        });
        let settled = Arc::new(Settled::default());
        let progress: Arc<dyn ProgressCallback> = settled.clone();
        let policy = retry_policy(&IngestConfig::default());
        let window = tiles(2);

        let (outcomes, midway) = tokio::join!(
            fetch_window(&lookup, &window, policy, &progress),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                settled.0.load(Ordering::SeqCst)
            }
        );

        assert_eq!(midway, 1);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(settled.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn thousand_tiles_run_as_hundred_sequential_windows() {
        let lookup = FakeLookup::new(vec![], |lat| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ms = (lat as u64 % 10) + 1;
            Duration::from_millis(ms)
        });
        let config = IngestConfig::default();
        let start = Instant::now();

        let fetched = run_batch(&lookup, &tiles(1000), &config, &null_progress()).await;
        assert_eq!(fetched.len(), 1000);

        let calls = lookup.calls.lock().unwrap().clone();
        let span = |w: i64| {
            let ids = w * 10..w * 10 + 10;
            let first_started = ids.clone().map(|id| calls[&id].0).min().unwrap();
            let last_settled = ids.map(|id| calls[&id].1).max().unwrap();
            (first_started, last_settled)
        };

        for k in 0..99 {
            let (_, last_settled) = span(k);
            let (next_started, _) = span(k + 1);

            assert!(next_started >= last_settled + config.window_pause);
        }

        // Slowest lookup per window is 10ms; each window is followed by
        // one 500ms pause.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100 * 510));
        assert!(elapsed < Duration::from_millis(100 * 510 + 200));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_follows_every_window_regardless_of_outcome() {
        let lookup = FakeLookup::new(vec![0.0, 1.0, 2.0], |_| Duration::ZERO);
        let config = IngestConfig {
            concurrency: 1,
            ..IngestConfig::default()
        };
        let start = Instant::now();

        let fetched = run_batch(&lookup, &tiles(3), &config, &null_progress()).await;

        assert!(fetched.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert!(start.elapsed() < Duration::from_millis(1510));
    }
}
