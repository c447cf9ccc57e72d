//! Image preload queue.
//!
//! A single-concurrency fetch pipeline: at most one image fetch is in flight
//! at any time, so the assets of the question on screen never compete with
//! prefetch traffic. Every processed URL lands in the loaded set whether the
//! fetch succeeded or not; failures are logged and never retried.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::model::{AssetLayout, ImageCount};
use crate::traits::ImageFetcher;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    loaded: HashSet<String>,
    catalog: Option<Arc<Catalog>>,
}

/// One instance per session.
pub struct ImagePreloadQueue {
    fetcher: Arc<dyn ImageFetcher>,
    assets: AssetLayout,
    state: Mutex<QueueState>,
    in_flight: Semaphore,
    wake: Notify,
}

impl ImagePreloadQueue {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, assets: AssetLayout) -> Self {
        Self {
            fetcher,
            assets,
            state: Mutex::new(QueueState::default()),
            in_flight: Semaphore::new(1),
            wake: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn assets(&self) -> &AssetLayout {
        &self.assets
    }

    /// Every image URL of the catalog in load order: age group, then query
    /// number, then image index.
    pub fn ordered_urls(&self, catalog: &Catalog) -> Vec<String> {
        catalog
            .iter()
            .flat_map(|q| self.assets.question_urls(&q.query_number, q.image_count))
            .collect()
    }

    /// Remember the catalog and queue all of its images.
    pub fn start_loading(&self, catalog: Arc<Catalog>) {
        if catalog.is_empty() {
            return;
        }
        let urls = self.ordered_urls(&catalog);
        self.state().catalog = Some(catalog);
        self.enqueue_all(urls);
    }

    /// Replace the pending list. URLs already loaded are not re-added.
    pub fn enqueue_all(&self, urls: impl IntoIterator<Item = String>) {
        let queued = {
            let mut state = self.state();
            let mut seen = HashSet::new();
            let pending: VecDeque<String> = urls
                .into_iter()
                .filter(|url| !state.loaded.contains(url) && seen.insert(url.clone()))
                .collect();
            state.pending = pending;
            state.pending.len()
        };
        tracing::debug!("{queued} images pending preload");
        self.wake.notify_one();
    }

    /// Regenerate the pending list from the remembered catalog.
    pub fn update_priority(&self) {
        let catalog = self.state().catalog.clone();
        match catalog {
            Some(catalog) => self.enqueue_all(self.ordered_urls(&catalog)),
            None => tracing::debug!("preload priority update before catalog load"),
        }
    }

    /// Fetch the next pending image. Returns the processed URL, or `None`
    /// when nothing is pending.
    pub async fn process_next(&self) -> Option<String> {
        let _permit = self.in_flight.acquire().await.ok()?;

        let url = {
            let mut state = self.state();
            loop {
                let url = state.pending.pop_front()?;
                if !state.loaded.contains(&url) {
                    break url;
                }
            }
        };

        if let Err(e) = self.fetcher.fetch(&url).await {
            tracing::warn!("failed to load image {url}: {e:#}");
        }
        self.state().loaded.insert(url.clone());
        Some(url)
    }

    /// Drain the pending list. Returns the number of URLs processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.process_next().await.is_some() {
            processed += 1;
        }
        processed
    }

    /// Run the queue in the background until the returned task is aborted.
    pub fn spawn(queue: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let processed = queue.run_until_idle().await;
                if processed > 0 {
                    tracing::debug!("preloaded {processed} images");
                }
                queue.wake.notified().await;
            }
        })
    }

    /// Whether every image of a question has been processed.
    pub fn is_ready(&self, query_number: &str, image_count: ImageCount) -> bool {
        let state = self.state();
        self.assets
            .question_urls(query_number, image_count)
            .iter()
            .all(|url| state.loaded.contains(url))
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.state().loaded.contains(url)
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn loaded_len(&self) -> usize {
        self.state().loaded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_catalog_str;
    use crate::mock::MockImageFetcher;
    use std::time::Duration;

    const CSV: &str = "\
query_number,query,query_type,age_group,image_count,answer
10,b,הבנה,2:07-3:00,2,1
3,a,הבנה,2:07-3:00,1,1
7,c,הבנה,2:00-2:06,2|3,1
";

    fn queue(fetcher: Arc<MockImageFetcher>) -> ImagePreloadQueue {
        ImagePreloadQueue::new(fetcher, AssetLayout::new("assets"))
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(parse_catalog_str(CSV).unwrap())
    }

    #[tokio::test]
    async fn resolves_in_catalog_order() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let queue = queue(fetcher.clone());
        queue.start_loading(catalog());
        assert_eq!(queue.run_until_idle().await, 6);

        assert_eq!(
            fetcher.fetched(),
            vec![
                "assets/7/image_1.webp",
                "assets/7/image_2.webp",
                "assets/7/image_3.webp",
                "assets/3/image_1.webp",
                "assets/10/image_1.webp",
                "assets/10/image_2.webp",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_one_fetch_in_flight() {
        let fetcher = Arc::new(MockImageFetcher::new().with_delay(Duration::from_millis(50)));
        let queue = queue(fetcher.clone());
        queue.start_loading(catalog());

        let (a, b) = tokio::join!(queue.run_until_idle(), queue.run_until_idle());
        assert_eq!(a + b, 6);
        assert_eq!(fetcher.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_counts_as_loaded() {
        let fetcher = Arc::new(MockImageFetcher::new().failing_on("assets/3/image_1.webp"));
        let queue = queue(fetcher.clone());
        queue.start_loading(catalog());
        queue.run_until_idle().await;

        assert!(queue.is_ready("3", ImageCount::Single(1)));
        assert_eq!(fetcher.fetch_count("assets/3/image_1.webp"), 1);
    }

    #[tokio::test]
    async fn priority_update_does_not_refetch() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let queue = queue(fetcher.clone());
        queue.start_loading(catalog());
        queue.process_next().await;
        queue.process_next().await;

        queue.update_priority();
        assert_eq!(queue.pending_len(), 4);
        queue.run_until_idle().await;

        assert_eq!(fetcher.fetched().len(), 6);
        assert_eq!(queue.loaded_len(), 6);
    }

    #[tokio::test]
    async fn readiness_requires_every_image() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let queue = queue(fetcher);
        queue.enqueue_all(["assets/10/image_1.webp".to_string()]);
        queue.run_until_idle().await;

        assert!(!queue.is_ready("10", ImageCount::Single(2)));
        assert!(queue.is_loaded("assets/10/image_1.webp"));

        queue.enqueue_all(["assets/10/image_2.webp".to_string()]);
        queue.run_until_idle().await;
        assert!(queue.is_ready("10", ImageCount::Single(2)));
    }

    #[tokio::test]
    async fn enqueue_replaces_pending() {
        let queue = queue(Arc::new(MockImageFetcher::new()));
        queue.enqueue_all(["a".to_string(), "b".to_string()]);
        queue.enqueue_all(["c".to_string(), "c".to_string()]);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.process_next().await.as_deref(), Some("c"));
        assert_eq!(queue.process_next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_drains_new_work() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let queue = Arc::new(queue(fetcher.clone()));
        let handle = ImagePreloadQueue::spawn(Arc::clone(&queue));

        queue.start_loading(catalog());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.loaded_len(), 6);

        handle.abort();
    }
}
