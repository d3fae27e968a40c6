use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::ContentCache;
use crate::events::{send_event, spawn_reporting, StoriesEvent};
use crate::model::{Company, Story, StoryKind};
use crate::net::{Network, NetworkError};
use crate::util::parse_request_url;

/// Loads story media through the cache and reports readiness as events.
///
/// Images are served from the cache or fetched and stored. Videos are
/// streamed by the host player, so a video is ready as soon as its URL is
/// usable; the host reports the real play length through
/// [`CarouselController::media_ready`](super::CarouselController::media_ready).
pub struct MediaLoader<N> {
    network: Arc<N>,
    cache: Arc<ContentCache>,
    events: mpsc::Sender<StoriesEvent>,
}

impl<N> Clone for MediaLoader<N> {
    fn clone(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
            cache: Arc::clone(&self.cache),
            events: self.events.clone(),
        }
    }
}

impl<N: Network> MediaLoader<N> {
    pub fn new(
        network: Arc<N>,
        cache: Arc<ContentCache>,
        events: mpsc::Sender<StoriesEvent>,
    ) -> Self {
        Self {
            network,
            cache,
            events,
        }
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn events(&self) -> &mpsc::Sender<StoriesEvent> {
        &self.events
    }

    /// Load one story and send `MediaReady` or `MediaFailed` tagged with
    /// `generation`. The caller owns the handle and aborts it when the story
    /// is left.
    pub fn spawn_load(&self, company_id: i64, story: &Story, generation: u64) -> JoinHandle<()> {
        let network = Arc::clone(&self.network);
        let cache = Arc::clone(&self.cache);
        let tx = self.events.clone();
        let story_id = story.story_id.clone();
        let media_url = story.media_url.clone();
        let kind = story.kind;

        spawn_reporting("media_load", self.events.clone(), async move {
            let result = match kind {
                StoryKind::Image => {
                    fetch_cached(network.as_ref(), &cache, &story_id, &media_url)
                        .await
                        .map(|_| ())
                }
                StoryKind::Video => parse_request_url(&media_url)
                    .map(|_| ())
                    .map_err(|e| NetworkError::InvalidUrl(e.to_string())),
            };

            let event = match result {
                Ok(()) => {
                    tracing::debug!(company_id, story_id = %story_id, generation, "Story media ready");
                    StoriesEvent::MediaReady {
                        company_id,
                        story_id,
                        generation,
                        duration: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(company_id, story_id = %story_id, error = %e, "Story media failed to load");
                    StoriesEvent::MediaFailed {
                        company_id,
                        story_id,
                        generation,
                        error: e.to_string(),
                    }
                }
            };
            send_event(&tx, event).await;
        })
    }

    /// Warm the cache with the logo and every image story of `company`,
    /// skipping `except` (already being loaded). Failures are only logged.
    pub fn spawn_prefetch(&self, company: &Company, except: Option<&str>) -> JoinHandle<()> {
        let network = Arc::clone(&self.network);
        let cache = Arc::clone(&self.cache);
        let company_id = company.company_id;

        let mut targets: Vec<(String, String)> = Vec::new();
        if !company.logo_url.is_empty() {
            targets.push((company.external_id.clone(), company.logo_url.clone()));
        }
        // Videos stream through the host player and are never cached
        targets.extend(
            company
                .stories
                .iter()
                .filter(|s| s.kind == StoryKind::Image && Some(s.story_id.as_str()) != except)
                .map(|s| (s.story_id.clone(), s.media_url.clone())),
        );

        spawn_reporting("prefetch", self.events.clone(), async move {
            let mut fetched = 0usize;
            for (key, url) in targets {
                if cache.has(&key).await {
                    continue;
                }
                match fetch_cached(network.as_ref(), &cache, &key, &url).await {
                    Ok(_) => fetched += 1,
                    Err(e) => tracing::debug!(key = %key, error = %e, "Prefetch failed"),
                }
            }
            tracing::debug!(company_id, fetched, "Prefetch finished");
        })
    }
}

/// Cache hit, or GET and store. A failed store still returns the bytes.
pub(crate) async fn fetch_cached<N: Network>(
    network: &N,
    cache: &ContentCache,
    key: &str,
    url: &str,
) -> Result<Vec<u8>, NetworkError> {
    if let Ok(bytes) = cache.get(key).await {
        return Ok(bytes);
    }
    let bytes = network.get_bytes(url).await?;
    cache.store_best_effort(key, &bytes).await;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkInfo;
    use crate::net::fake::FakeNetwork;

    fn image(id: &str) -> Story {
        Story {
            story_id: id.to_string(),
            kind: StoryKind::Image,
            created_at: 1,
            expires_at: 0,
            view_count: 0,
            clap_count: 0,
            thumbnail_url: String::new(),
            media_url: format!("https://cdn.test/{id}.jpg"),
            is_seen: false,
            is_clapped: false,
            link: LinkInfo::None,
        }
    }

    async fn setup() -> (
        tempfile::TempDir,
        Arc<FakeNetwork>,
        Arc<ContentCache>,
        MediaLoader<FakeNetwork>,
        mpsc::Receiver<StoriesEvent>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContentCache::open(dir.path(), 4).await.unwrap());
        let network = Arc::new(FakeNetwork::new());
        let (tx, rx) = mpsc::channel(16);
        let loader = MediaLoader::new(Arc::clone(&network), Arc::clone(&cache), tx);
        (dir, network, cache, loader, rx)
    }

    #[tokio::test]
    async fn test_image_load_fetches_and_caches() {
        let (_dir, network, cache, loader, mut rx) = setup().await;
        network.serve_bytes("https://cdn.test/s1.jpg", b"jpeg");

        loader.spawn_load(7, &image("s1"), 3).await.unwrap();

        match rx.recv().await {
            Some(StoriesEvent::MediaReady {
                company_id,
                story_id,
                generation,
                duration,
            }) => {
                assert_eq!((company_id, story_id.as_str(), generation), (7, "s1", 3));
                assert_eq!(duration, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(cache.get("s1").await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_image_load_prefers_cache() {
        let (_dir, _network, cache, loader, mut rx) = setup().await;
        cache.put("s1", b"cached").await.unwrap();

        loader.spawn_load(7, &image("s1"), 1).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(StoriesEvent::MediaReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_image_load_failure_reported() {
        let (_dir, _network, _cache, loader, mut rx) = setup().await;

        loader.spawn_load(7, &image("missing"), 2).await.unwrap();
        match rx.recv().await {
            Some(StoriesEvent::MediaFailed {
                story_id,
                generation,
                ..
            }) => {
                assert_eq!(story_id, "missing");
                assert_eq!(generation, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_video_ready_without_download() {
        let (_dir, network, cache, loader, mut rx) = setup().await;
        let mut video = image("v1");
        video.kind = StoryKind::Video;
        video.media_url = "https://cdn.test/v1.mp4".into();

        loader.spawn_load(7, &video, 1).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(StoriesEvent::MediaReady { duration: None, .. })
        ));
        assert!(!cache.has("v1").await);
        assert!(network.posts().is_empty());
    }

    #[tokio::test]
    async fn test_prefetch_warms_logo_and_images() {
        let (_dir, network, cache, loader, _rx) = setup().await;
        network.serve_bytes("https://cdn.test/logo.png", b"logo");
        network.serve_bytes("https://cdn.test/a.jpg", b"a");
        network.serve_bytes("https://cdn.test/b.jpg", b"b");

        let company = Company {
            company_id: 1,
            external_id: "ext-1".into(),
            name: "Acme".into(),
            logo_url: "https://cdn.test/logo.png".into(),
            story_count: 3,
            updated_at: 0,
            rank: 1,
            showcase: Default::default(),
            stories: vec![image("a"), image("b"), image("c")],
        };

        loader.spawn_prefetch(&company, Some("b")).await.unwrap();

        assert!(cache.has("ext-1").await);
        assert!(cache.has("a").await);
        // Skipped: being loaded by the foreground load
        assert!(!cache.has("b").await);
        // Not served: failure only logged
        assert!(!cache.has("c").await);
    }
}
