// src/discovery/fetcher.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::rate_limit::RateLimiter;
use super::shutdown_requested;
use crate::certspotter::{ClientError, GetIssuancesOptions, Issuance, IssuanceSource, ResponseMeta};
use crate::metrics::MetricsSink;

/// Pacing configuration for subscriptions
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Delay between sweeps when the server gives no longer hint
    pub interval: Duration,
    /// Added to a server `Retry-After` value before comparing it with `interval`
    pub retry_after_padding: Duration,
}

/// Result of one full pagination pass
#[derive(Debug, Default)]
pub struct Sweep {
    /// All issuances in page order
    pub issuances: Vec<Issuance>,
    /// Metadata of the last successful response
    pub last_response: Option<ResponseMeta>,
    /// Id of the last issuance consumed, or the starting cursor if none
    pub cursor: Option<String>,
    /// Set when the sweep stopped early on a request failure
    pub error: Option<ClientError>,
}

/// Rate-limited, paginating wrapper around an issuance source
pub struct Fetcher {
    source: Arc<dyn IssuanceSource>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<dyn MetricsSink>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn IssuanceSource>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<dyn MetricsSink>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            source,
            limiter,
            metrics,
            config,
        }
    }

    /// Fetch pages starting at `opts.after` until an empty page comes back.
    ///
    /// Returns `None` if shutdown was requested while waiting for a token
    /// or while a request was in flight; the request is dropped.
    /// A failing request ends the sweep with whatever was collected so far.
    pub async fn sweep(
        &self,
        opts: &GetIssuancesOptions,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<Sweep> {
        let mut opts = opts.clone();
        let mut sweep = Sweep {
            cursor: opts.after.clone(),
            ..Default::default()
        };

        loop {
            if !self.limiter.acquire(shutdown_rx).await {
                return None;
            }

            let fetched = tokio::select! {
                fetched = self.source.fetch_page(&opts) => fetched,
                _ = shutdown_requested(shutdown_rx) => {
                    debug!("Request for {} cancelled by shutdown", opts.domain);
                    return None;
                }
            };

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    sweep.last_response = None;
                    sweep.error = Some(e);
                    return Some(sweep);
                }
            };

            sweep.last_response = Some(page.response);

            let Some(last) = page.issuances.last() else {
                return Some(sweep);
            };

            opts.after = Some(last.id.clone());
            sweep.cursor = opts.after.clone();
            sweep.issuances.extend(page.issuances);
        }
    }

    /// Delay before the next sweep, honoring a longer server backoff hint
    pub fn next_delay(&self, last_response: Option<&ResponseMeta>) -> Duration {
        next_delay(
            last_response.and_then(ResponseMeta::retry_after),
            self.config.retry_after_padding,
            self.config.interval,
        )
    }

    /// Sweep forever, emitting one batch per sweep (possibly empty).
    ///
    /// The cursor carries over between sweeps so later sweeps only see new
    /// issuances. The task ends on shutdown or when the receiver is dropped.
    pub fn subscribe(
        self: Arc<Self>,
        mut opts: GetIssuancesOptions,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<Vec<Issuance>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            info!("Subscribing to issuances for {}", opts.domain);

            let mut delay = Duration::ZERO;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                }

                let Some(sweep) = self.sweep(&opts, &mut shutdown_rx).await else {
                    break;
                };

                self.metrics
                    .issuances_discovered(&opts.domain, sweep.issuances.len());

                if let Some(ref e) = sweep.error {
                    error!("Error getting issuances for {}: {}", opts.domain, e);
                }
                debug!(
                    "Got {} issuances for {}",
                    sweep.issuances.len(),
                    opts.domain
                );

                opts.after = sweep.cursor;
                delay = self.next_delay(sweep.last_response.as_ref());

                tokio::select! {
                    sent = tx.send(sweep.issuances) => {
                        if sent.is_err() {
                            debug!("Receiver for {} dropped", opts.domain);
                            break;
                        }
                    }
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                }
            }

            info!("Subscription for {} stopped", opts.domain);
        });

        (rx, handle)
    }
}

/// `retry_after + padding` if that is at least `interval`, else `interval`
pub fn next_delay(retry_after: Option<Duration>, padding: Duration, interval: Duration) -> Duration {
    match retry_after {
        Some(after) if after + padding >= interval => after + padding,
        _ => interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certspotter::Page;
    use crate::discovery::rate_limit::DEFAULT_BURST;
    use crate::metrics::NoopMetrics;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn issuance(id: &str) -> Issuance {
        Issuance {
            id: id.to_string(),
            dns_names: vec![],
            tbs_sha256: None,
            not_before: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
            pubkey_sha256: None,
            issuer: None,
            certificate: None,
        }
    }

    /// Serves pages keyed by cursor ("" for the first page) and records requests
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<HashMap<String, Vec<Issuance>>>,
        failing: Mutex<Option<String>>,
        retry_after: Mutex<Option<String>>,
        requests: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn with_pages(pages: &[(&str, &[&str])]) -> Self {
            let source = Self::default();
            source.set_pages(pages);
            source
        }

        fn set_pages(&self, pages: &[(&str, &[&str])]) {
            let mut map = self.pages.lock().unwrap();
            map.clear();
            for (after, ids) in pages {
                map.insert(after.to_string(), ids.iter().map(|id| issuance(id)).collect());
            }
        }

        fn requests(&self) -> Vec<Option<String>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IssuanceSource for ScriptedSource {
        async fn fetch_page(&self, opts: &GetIssuancesOptions) -> Result<Page, ClientError> {
            self.requests.lock().unwrap().push(opts.after.clone());
            let key = opts.after.clone().unwrap_or_default();

            if self.failing.lock().unwrap().as_deref() == Some(key.as_str()) {
                return Err(ClientError::UnexpectedStatus {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    retry_after: None,
                });
            }

            let issuances = self.pages.lock().unwrap().get(&key).cloned().unwrap_or_default();
            Ok(Page {
                issuances,
                response: ResponseMeta {
                    status: 200,
                    retry_after: self.retry_after.lock().unwrap().clone(),
                },
            })
        }
    }

    fn fetcher(source: Arc<ScriptedSource>, interval: Duration) -> Arc<Fetcher> {
        Arc::new(Fetcher::new(
            source,
            Arc::new(RateLimiter::new(1000.0, DEFAULT_BURST)),
            Arc::new(NoopMetrics),
            FetcherConfig {
                interval,
                retry_after_padding: Duration::ZERO,
            },
        ))
    }

    fn ids(issuances: &[Issuance]) -> Vec<&str> {
        issuances.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_next_delay_selection() {
        let interval = Duration::from_secs(60);
        let zero = Duration::ZERO;

        assert_eq!(next_delay(None, zero, interval), interval);
        assert_eq!(next_delay(Some(Duration::from_secs(30)), zero, interval), interval);
        assert_eq!(next_delay(Some(Duration::from_secs(60)), zero, interval), interval);
        assert_eq!(
            next_delay(Some(Duration::from_secs(120)), zero, interval),
            Duration::from_secs(120)
        );
        assert_eq!(
            next_delay(Some(Duration::from_secs(59)), Duration::from_secs(1), interval),
            interval
        );
        assert_eq!(
            next_delay(Some(Duration::from_secs(90)), Duration::from_secs(1), interval),
            Duration::from_secs(91)
        );
    }

    #[tokio::test]
    async fn test_sweep_zero_pages() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &[])]));
        let fetcher = fetcher(source.clone(), Duration::from_secs(1));
        let (_tx, mut rx) = watch::channel(false);

        let sweep = fetcher
            .sweep(&GetIssuancesOptions::for_domain("example.com", false), &mut rx)
            .await
            .unwrap();

        assert!(sweep.issuances.is_empty());
        assert!(sweep.cursor.is_none());
        assert!(sweep.error.is_none());
        assert_eq!(source.requests(), vec![None]);
    }

    #[tokio::test]
    async fn test_sweep_multiple_pages_in_order() {
        let source = Arc::new(ScriptedSource::with_pages(&[
            ("", &["1", "2"]),
            ("2", &["3"]),
            ("3", &[]),
        ]));
        let fetcher = fetcher(source.clone(), Duration::from_secs(1));
        let (_tx, mut rx) = watch::channel(false);

        let sweep = fetcher
            .sweep(&GetIssuancesOptions::for_domain("example.com", false), &mut rx)
            .await
            .unwrap();

        assert_eq!(ids(&sweep.issuances), vec!["1", "2", "3"]);
        assert_eq!(sweep.cursor.as_deref(), Some("3"));
        assert_eq!(sweep.last_response.unwrap().status, 200);
        assert_eq!(
            source.requests(),
            vec![None, Some("2".to_string()), Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_partial_results_on_error() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &["1"])]));
        *source.failing.lock().unwrap() = Some("1".to_string());
        let fetcher = fetcher(source.clone(), Duration::from_secs(1));
        let (_tx, mut rx) = watch::channel(false);

        let sweep = fetcher
            .sweep(&GetIssuancesOptions::for_domain("example.com", false), &mut rx)
            .await
            .unwrap();

        assert_eq!(ids(&sweep.issuances), vec!["1"]);
        assert_eq!(sweep.cursor.as_deref(), Some("1"));
        assert!(sweep.last_response.is_none());
        assert!(matches!(sweep.error, Some(ClientError::UnexpectedStatus { .. })));
        assert_eq!(fetcher.next_delay(sweep.last_response.as_ref()), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sweep_cancelled_before_first_request() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &["1"])]));
        let fetcher = fetcher(source.clone(), Duration::from_secs(1));
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let sweep = fetcher
            .sweep(&GetIssuancesOptions::for_domain("example.com", false), &mut rx)
            .await;

        assert!(sweep.is_none());
        assert!(source.requests().is_empty());
    }

    /// Never answers, like an upstream that hangs until the transport timeout
    struct HangingSource {
        requests: Mutex<usize>,
    }

    #[async_trait]
    impl IssuanceSource for HangingSource {
        async fn fetch_page(&self, _opts: &GetIssuancesOptions) -> Result<Page, ClientError> {
            *self.requests.lock().unwrap() += 1;
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_sweep_cancels_request_in_flight() {
        let source = Arc::new(HangingSource {
            requests: Mutex::new(0),
        });
        let fetcher = Fetcher::new(
            source.clone(),
            Arc::new(RateLimiter::new(1000.0, DEFAULT_BURST)),
            Arc::new(NoopMetrics),
            FetcherConfig {
                interval: Duration::from_secs(60),
                retry_after_padding: Duration::ZERO,
            },
        );
        let (tx, mut rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        let sweep = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.sweep(&GetIssuancesOptions::for_domain("example.com", false), &mut rx),
        )
        .await
        .expect("sweep did not stop on shutdown");

        assert!(sweep.is_none());
        assert_eq!(*source.requests.lock().unwrap(), 1);
        stopper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_carries_cursor_between_sweeps() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &["1"]), ("1", &[])]));
        let fetcher = fetcher(source.clone(), Duration::from_secs(10));
        let (tx, rx) = watch::channel(false);

        let (mut batches, handle) =
            fetcher.subscribe(GetIssuancesOptions::for_domain("example.com", false), rx);

        let first = batches.recv().await.unwrap();
        assert_eq!(ids(&first), vec!["1"]);

        source.set_pages(&[("", &["1"]), ("1", &["2"]), ("2", &[])]);

        let second = batches.recv().await.unwrap();
        assert_eq!(ids(&second), vec!["2"]);

        source.set_pages(&[("2", &[])]);
        let third = batches.recv().await.unwrap();
        assert!(third.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(batches.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_honors_longer_retry_after() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &[])]));
        *source.retry_after.lock().unwrap() = Some("30".to_string());
        let fetcher = fetcher(source.clone(), Duration::from_secs(10));
        let (_tx, rx) = watch::channel(false);

        let (mut batches, handle) =
            fetcher.subscribe(GetIssuancesOptions::for_domain("example.com", false), rx);

        batches.recv().await.unwrap();
        let start = tokio::time::Instant::now();
        batches.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));

        drop(batches);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_stops_when_receiver_dropped() {
        let source = Arc::new(ScriptedSource::with_pages(&[("", &[])]));
        let fetcher = fetcher(source, Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);

        let (batches, handle) =
            fetcher.subscribe(GetIssuancesOptions::for_domain("example.com", false), rx);
        drop(batches);

        handle.await.unwrap();
    }
}
