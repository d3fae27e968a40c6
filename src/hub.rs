//! Owner of the home company list.
//!
//! [`StoriesHub`] restores the list from a [`CompanyStore`], refreshes it from
//! the feed, opens and closes viewing sessions, and applies every background
//! result that arrives on the [`StoriesEvent`] channel.
//!
//! The hub's list is the prior snapshot for reconciliation. A session works on
//! its own copy; closing the session hands that copy back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::ContentCache;
use crate::carousel::{CarouselController, MediaLoader, PlaybackSettings, SessionOptions};
use crate::config::Config;
use crate::events::{send_event, spawn_reporting, StoriesEvent};
use crate::feed::fetch_companies;
use crate::model::Company;
use crate::net::Network;
use crate::reconcile::{merge_local_state, purge_cache, reconcile, reorder, ReorderMode};
use crate::storage::CompanyStore;
use crate::timeline::Clock;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Host-facing outcomes, drained with [`StoriesHub::take_signals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubSignal {
    /// The home list changed; redraw it.
    ListUpdated,
    /// A refresh failed; the previous list is still shown.
    RefreshFailed(String),
}

pub struct StoriesHub<N: Network, S: CompanyStore> {
    companies: Vec<Company>,
    network: Arc<N>,
    store: Arc<S>,
    cache: Arc<ContentCache>,
    clock: Arc<dyn Clock>,
    feed_url: String,
    settings: PlaybackSettings,
    event_tx: mpsc::Sender<StoriesEvent>,
    refresh_generation: u64,
    refresh_handle: Option<JoinHandle<()>>,
    session: Option<CarouselController<N>>,
    /// A refresh landed while a session held its own copy.
    refreshed_during_session: bool,
    hidden: bool,
    signals: Vec<HubSignal>,
}

impl<N: Network, S: CompanyStore> StoriesHub<N, S> {
    /// Build a hub and the receiver its background tasks report to.
    ///
    /// Feed every received event back into [`handle_event`](Self::handle_event).
    pub fn new(
        network: Arc<N>,
        store: Arc<S>,
        cache: Arc<ContentCache>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<StoriesEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let hub = Self {
            companies: Vec::new(),
            network,
            store,
            cache,
            clock,
            feed_url: config.feed_url.clone(),
            settings: PlaybackSettings::from_config(config),
            event_tx,
            refresh_generation: 0,
            refresh_handle: None,
            session: None,
            refreshed_during_session: false,
            hidden: false,
            signals: Vec::new(),
        };
        (hub, event_rx)
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn session(&self) -> Option<&CarouselController<N>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut CarouselController<N>> {
        self.session.as_mut()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn take_signals(&mut self) -> Vec<HubSignal> {
        std::mem::take(&mut self.signals)
    }

    // ========================================================================
    // Load and Refresh
    // ========================================================================

    /// Restore the persisted list, then refresh it from the feed.
    ///
    /// A store failure starts from an empty list.
    pub async fn load(&mut self) {
        if self.hidden {
            return;
        }
        self.restore().await;
        self.refresh();
    }

    /// Restore the persisted list without touching the network.
    pub async fn restore(&mut self) -> bool {
        match self.store.load_companies().await {
            Ok(companies) => {
                tracing::info!(companies = companies.len(), "Restored stories");
                self.companies = companies;
                self.signals.push(HubSignal::ListUpdated);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore stories, starting empty");
                self.companies.clear();
                false
            }
        }
    }

    /// Fetch and reconcile in the background. A refresh already in flight is
    /// aborted and superseded.
    pub fn refresh(&mut self) {
        if self.hidden {
            return;
        }
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
            tracing::debug!("Superseded in-flight refresh");
        }
        self.refresh_generation += 1;
        let generation = self.refresh_generation;

        let network = Arc::clone(&self.network);
        let feed_url = self.feed_url.clone();
        let prior = self.companies.clone();
        let tx = self.event_tx.clone();
        self.refresh_handle = Some(spawn_reporting("refresh", self.event_tx.clone(), async move {
            let result = match fetch_companies(network.as_ref(), &feed_url).await {
                Ok(fresh) => {
                    let received = fresh.len();
                    let merged = reconcile(fresh, &prior);
                    tracing::debug!(
                        generation,
                        received,
                        kept = merged.len(),
                        "Reconciled stories feed"
                    );
                    Ok(merged)
                }
                Err(e) => Err(e.to_string()),
            };
            send_event(&tx, StoriesEvent::RefreshComplete { generation, result }).await;
        }));
    }

    fn apply_refresh(&mut self, generation: u64, result: Result<Vec<Company>, String>) {
        if generation != self.refresh_generation {
            tracing::debug!(generation, current = self.refresh_generation, "Stale refresh result");
            return;
        }
        self.refresh_handle = None;

        match result {
            Ok(mut companies) => {
                // Seen and clap flags may have reached the list while the
                // fetch was in flight.
                merge_local_state(&mut companies, &self.companies);
                let companies = reorder(companies, ReorderMode::Refresh);
                tracing::info!(companies = companies.len(), "Stories refreshed");
                self.companies = companies;
                if self.session.is_some() {
                    self.refreshed_during_session = true;
                }
                self.signals.push(HubSignal::ListUpdated);
                self.schedule_purge();
            }
            Err(error) => {
                tracing::warn!(error = %error, "Stories refresh failed, keeping current list");
                self.signals.push(HubSignal::RefreshFailed(error));
            }
        }
    }

    fn schedule_purge(&self) {
        let companies = self.companies.clone();
        let cache = Arc::clone(&self.cache);
        let tx = self.event_tx.clone();
        spawn_reporting("cache_purge", self.event_tx.clone(), async move {
            let evicted = purge_cache(&companies, &cache).await;
            send_event(&tx, StoriesEvent::CachePurged { evicted }).await;
        });
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a viewing session on `companies[index]`. Returns false when the
    /// index is out of range or a session is already open.
    pub fn open_session(&mut self, index: usize) -> bool {
        self.start_session(index, SessionOptions::default())
    }

    /// Open a session from a company's showcase page.
    pub fn open_session_for(&mut self, company_id: i64) -> bool {
        let Some(index) = self.companies.iter().position(|c| c.company_id == company_id) else {
            tracing::debug!(company_id, "No stories for showcase company");
            return false;
        };
        self.start_session(
            index,
            SessionOptions {
                from_showcase: true,
            },
        )
    }

    fn start_session(&mut self, index: usize, options: SessionOptions) -> bool {
        if self.hidden || self.session.is_some() {
            return false;
        }
        let loader = MediaLoader::new(
            Arc::clone(&self.network),
            Arc::clone(&self.cache),
            self.event_tx.clone(),
        );
        match CarouselController::new(
            self.companies.clone(),
            index,
            options,
            loader,
            self.settings.clone(),
            Arc::clone(&self.clock),
        ) {
            Some(controller) => {
                self.session = Some(controller);
                self.refreshed_during_session = false;
                true
            }
            None => false,
        }
    }

    /// End the session and take its list back.
    ///
    /// When a refresh landed meanwhile, the session's seen/clap flags are
    /// merged into the refreshed list instead.
    pub fn close_session(&mut self) -> bool {
        let Some(controller) = self.session.take() else {
            return false;
        };
        let finished = controller.finish();

        self.companies = if self.refreshed_during_session {
            let mut refreshed = std::mem::take(&mut self.companies);
            merge_local_state(&mut refreshed, &finished);
            reorder(refreshed, ReorderMode::SessionExit)
        } else {
            finished
        };
        self.refreshed_during_session = false;
        self.signals.push(HubSignal::ListUpdated);
        tracing::debug!(companies = self.companies.len(), "Story session closed");
        true
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Hide or show the stories strip. Hiding persists the list; showing
    /// reloads and refreshes it.
    pub async fn set_hidden(&mut self, hidden: bool) {
        if hidden == self.hidden {
            return;
        }
        if hidden {
            if let Some(handle) = self.refresh_handle.take() {
                handle.abort();
            }
            self.persist().await;
            self.hidden = true;
        } else {
            self.hidden = false;
            self.load().await;
        }
    }

    /// App going to the background: pause playback and persist.
    pub async fn suspend(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_lost_focus();
        }
        if !self.hidden {
            self.persist().await;
        }
    }

    /// App back in the foreground.
    pub fn resume(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_became_focused();
        }
    }

    /// Save the home list. Failures are logged; the next save retries.
    pub async fn persist(&self) -> bool {
        match self.store.save_companies(&self.companies).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist stories");
                false
            }
        }
    }

    // ========================================================================
    // Event Routing
    // ========================================================================

    /// Apply one background result.
    pub fn handle_event(&mut self, event: StoriesEvent) {
        match event {
            StoriesEvent::RefreshComplete { generation, result } => {
                self.apply_refresh(generation, result);
            }
            StoriesEvent::CachePurged { evicted } => {
                tracing::debug!(evicted, "Purged stale cache entries");
            }
            StoriesEvent::TaskPanicked { task, error } => {
                tracing::error!(task, error = %error, "Background task panicked");
                if task == "refresh" {
                    self.refresh_handle = None;
                    self.signals.push(HubSignal::RefreshFailed(error));
                }
            }
            other => {
                let consumed = self
                    .session
                    .as_mut()
                    .is_some_and(|session| session.handle_event(&other));
                self.apply_to_list(&other, consumed);
            }
        }
    }

    /// Clap and block outcomes outlive the session that sent them.
    fn apply_to_list(&mut self, event: &StoriesEvent, consumed: bool) {
        match event {
            StoriesEvent::ClapAcked {
                company_id,
                story_id,
                clapped: true,
            } if !consumed => {
                let story = self
                    .companies
                    .iter_mut()
                    .filter(|c| c.company_id == *company_id)
                    .find_map(|c| c.story_mut(story_id));
                if let Some(story) = story {
                    story.is_clapped = true;
                    tracing::debug!(story_id = %story_id, "Late clap acknowledgment applied");
                }
            }
            StoriesEvent::BlockResult {
                company_id,
                blocked: true,
            } => {
                let before = self.companies.len();
                self.companies.retain(|c| c.company_id != *company_id);
                if self.companies.len() != before {
                    self.signals.push(HubSignal::ListUpdated);
                }
            }
            _ => {}
        }
    }
}

impl<N: Network, S: CompanyStore> Drop for StoriesHub<N, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
            tracing::debug!("Aborted refresh task on hub drop");
        }
    }
}
