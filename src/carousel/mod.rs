//! Story viewing session: a pager of companies, each with its own timeline.
//!
//! [`CarouselController`] owns a working copy of the company list for the
//! lifetime of one session and hands it back from [`CarouselController::finish`].
//! Per-company playback state is keyed by `company_id`, and only the focused
//! company's timeline ever runs.
//!
//! The controller never blocks. Media loads and clap/block POSTs run as tokio
//! tasks that report back through [`StoriesEvent`]s; the owner feeds those to
//! [`CarouselController::handle_event`]. Host-facing outcomes (story or company
//! changed, confirm a block, dismiss) queue up as [`SessionSignal`]s.

mod media;

pub use media::MediaLoader;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use url::Url;

use crate::config::Config;
use crate::events::{send_event, spawn_reporting, StoriesEvent};
use crate::model::{Company, LinkInfo, RecruiterProfile, Showcase, Story, StoryKind, StoryPhase};
use crate::net::{submit_block, submit_clap, Network};
use crate::reconcile::{reorder, ReorderMode};
use crate::timeline::{Clock, Direction, ProgressTimeline, TimelineEvent};
use crate::util::{elapsed_label, normalize_link};

// ============================================================================
// Settings and Signals
// ============================================================================

/// Playback knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub clap_url: String,
    pub block_url: String,
    pub image_duration: Duration,
    pub video_fallback: Duration,
    pub max_claps: u32,
}

impl PlaybackSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            clap_url: config.clap_url.clone(),
            block_url: config.block_url.clone(),
            image_duration: config.image_duration(),
            video_fallback: config.video_fallback(),
            max_claps: config.max_claps,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Opened from a company's showcase page: any company change exits.
    pub from_showcase: bool,
}

/// Outcomes the host should react to, drained with
/// [`CarouselController::take_signals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// Focus moved to the company at `index` of [`CarouselController::companies`].
    CompanyChanged { index: usize, company_id: i64 },
    /// The focused company now shows story `index`.
    StoryChanged { company_id: i64, index: usize },
    /// Ask the user to confirm blocking; answer with `confirm_block` / `cancel_block`.
    ConfirmBlock { company_id: i64, name: String },
    /// The current story's media could not be loaded.
    MediaFailed { company_id: i64, story_id: String },
    /// The server did not acknowledge a clap; revert the clap affordance.
    ClapFailed { company_id: i64, story_id: String },
    /// The session is over; call `finish` to take the list back.
    Dismiss,
}

/// What a swipe-up on the current story leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    OpenUrl(Url),
    JobDetail { job_id: String },
    RecruiterProfile(RecruiterProfile),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Idle,
    Confirming(i64),
    Submitting(i64),
}

// ============================================================================
// Cell State
// ============================================================================

/// Playback state of one company cell.
#[derive(Debug)]
struct CellState {
    timeline: ProgressTimeline,
    story_index: usize,
    phase: StoryPhase,
    /// Play length reported with the last `media_ready`.
    ready_duration: Option<Duration>,
    /// Claps sent during this visit to the current story.
    clap_number: u32,
    /// Long-press pause in effect.
    holding: bool,
    /// Bars were wiped when the cell left the viewport; re-entry starts over
    /// from the first unseen story.
    cleared: bool,
}

impl CellState {
    fn new(bar_count: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeline: ProgressTimeline::new(bar_count, clock),
            story_index: 0,
            phase: StoryPhase::Unloaded,
            ready_duration: None,
            clap_number: 0,
            holding: false,
            cleared: false,
        }
    }

    fn enter_story(&mut self, index: usize) {
        self.story_index = index;
        self.phase = StoryPhase::Unloaded;
        self.ready_duration = None;
        self.clap_number = 0;
        self.holding = false;
    }

    fn clear(&mut self) {
        self.timeline.reset_bars();
        self.enter_story(0);
        self.cleared = true;
    }
}

// ============================================================================
// CarouselController
// ============================================================================

pub struct CarouselController<N: Network> {
    companies: Vec<Company>,
    cells: HashMap<i64, CellState>,
    focus: usize,
    /// App/view focus; playback only starts while true.
    view_focused: bool,
    started_all_seen: bool,
    from_showcase: bool,
    block: BlockState,
    dismissed: bool,
    signals: Vec<SessionSignal>,
    clock: Arc<dyn Clock>,
    loader: MediaLoader<N>,
    settings: PlaybackSettings,
    media_generation: u64,
    media_handle: Option<JoinHandle<()>>,
    prefetch_handle: Option<JoinHandle<()>>,
}

impl<N: Network> CarouselController<N> {
    /// Start a session on `companies[start]`.
    ///
    /// Returns `None` when `start` is out of range. Must be called inside a
    /// tokio runtime: the first media load is spawned immediately.
    pub fn new(
        companies: Vec<Company>,
        start: usize,
        options: SessionOptions,
        loader: MediaLoader<N>,
        settings: PlaybackSettings,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        let started_all_seen = companies.get(start)?.all_seen();
        let mut controller = Self {
            companies,
            cells: HashMap::new(),
            focus: start,
            view_focused: true,
            started_all_seen,
            from_showcase: options.from_showcase,
            block: BlockState::Idle,
            dismissed: false,
            signals: Vec::new(),
            clock,
            loader,
            settings,
            media_generation: 0,
            media_handle: None,
            prefetch_handle: None,
        };
        tracing::debug!(
            start,
            started_all_seen,
            from_showcase = options.from_showcase,
            "Story session opened"
        );
        controller.enter_company(start);
        Some(controller)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn focused_index(&self) -> usize {
        self.focus
    }

    pub fn focused_company(&self) -> Option<&Company> {
        self.companies.get(self.focus)
    }

    pub fn current_story(&self) -> Option<&Story> {
        let company = self.focused_company()?;
        let cell = self.cells.get(&company.company_id)?;
        company.stories.get(cell.story_index)
    }

    pub fn story_index(&self) -> usize {
        self.focused_cell().map_or(0, |c| c.story_index)
    }

    pub fn phase(&self) -> StoryPhase {
        self.focused_cell().map_or(StoryPhase::Unloaded, |c| c.phase)
    }

    /// Progress bars of the focused company.
    pub fn segments(&self) -> &[f64] {
        self.focused_cell()
            .map(|c| c.timeline.segments())
            .unwrap_or(&[])
    }

    pub fn clap_number(&self) -> u32 {
        self.focused_cell().map_or(0, |c| c.clap_number)
    }

    pub fn is_holding(&self) -> bool {
        self.focused_cell().is_some_and(|c| c.holding)
    }

    /// How often the host should call [`poll`](Self::poll).
    pub fn tick_interval(&self) -> Duration {
        self.focused_cell()
            .map_or(Duration::from_millis(25), |c| c.timeline.tick_interval())
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn started_all_seen(&self) -> bool {
        self.started_all_seen
    }

    pub fn is_block_pending(&self) -> bool {
        self.block != BlockState::Idle
    }

    /// "5m", "3h", "2d 4h" or "1w" since the current story was posted.
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> Option<String> {
        self.current_story()
            .map(|story| elapsed_label(story.created_at, now))
    }

    /// True when the current story carries an expiry that has passed.
    pub fn is_current_expired(&self, now: DateTime<Utc>) -> bool {
        self.current_story()
            .is_some_and(|story| story.is_expired(now.timestamp_millis()))
    }

    pub fn take_signals(&mut self) -> Vec<SessionSignal> {
        std::mem::take(&mut self.signals)
    }

    fn focused_id(&self) -> Option<i64> {
        self.companies.get(self.focus).map(|c| c.company_id)
    }

    fn focused_cell(&self) -> Option<&CellState> {
        self.cells.get(&self.focused_id()?)
    }

    fn focused_cell_mut(&mut self) -> Option<&mut CellState> {
        let id = self.focused_id()?;
        self.cells.get_mut(&id)
    }

    // ------------------------------------------------------------------------
    // Company navigation
    // ------------------------------------------------------------------------

    /// The focused company ran out of stories going forward.
    pub fn advance_company(&mut self, from: usize) {
        if self.dismissed {
            return;
        }
        if self.from_showcase {
            return self.dismiss_session("opened from showcase");
        }
        let next = from + 1;
        if next >= self.companies.len() {
            return self.dismiss_session("end of list");
        }
        if self.started_all_seen {
            return self.dismiss_session("session started on a seen company");
        }
        if self.companies[next..].iter().all(Company::all_seen) {
            return self.dismiss_session("remaining companies already seen");
        }
        self.move_focus(next);
    }

    /// The focused company was rewound past its first story.
    pub fn retreat_company(&mut self, from: usize) {
        if self.dismissed {
            return;
        }
        if self.from_showcase || self.started_all_seen || from == 0 || from > self.companies.len()
        {
            return self.dismiss_session("no previous company");
        }
        self.move_focus(from - 1);
    }

    /// The user paged to `index` and the pager settled.
    pub fn swipe_to(&mut self, index: usize) {
        if self.dismissed || index >= self.companies.len() {
            return;
        }
        if index == self.focus {
            self.on_became_focused();
        } else {
            self.move_focus(index);
        }
    }

    /// The user started dragging the pager.
    pub fn begin_drag(&mut self) {
        if self.from_showcase {
            return self.dismiss_session("dragged while opened from showcase");
        }
        self.on_lost_focus();
    }

    /// Swipe-down exit.
    pub fn dismiss(&mut self) {
        self.dismiss_session("dismissed by user");
    }

    fn move_focus(&mut self, to: usize) {
        if to != self.focus {
            self.on_cell_exited_viewport(self.focus);
        }
        self.view_focused = true;
        self.enter_company(to);
    }

    fn enter_company(&mut self, index: usize) {
        let Some(company) = self.companies.get(index) else {
            return;
        };
        let company_id = company.company_id;
        let bar_count = company.stories.len();
        let start = company.first_unseen().unwrap_or(0);

        let clock = Arc::clone(&self.clock);
        let cell = self
            .cells
            .entry(company_id)
            .or_insert_with(|| CellState::new(bar_count, clock));
        cell.timeline.start(bar_count);
        cell.timeline.start_from(start);
        cell.enter_story(start);
        cell.cleared = false;

        self.focus = index;
        tracing::debug!(index, company_id, story = start, "Company focused");
        self.signals
            .push(SessionSignal::CompanyChanged { index, company_id });
        self.signals.push(SessionSignal::StoryChanged {
            company_id,
            index: start,
        });

        self.load_current();
        self.prefetch_focused();
    }

    fn dismiss_session(&mut self, reason: &'static str) {
        if self.dismissed {
            return;
        }
        self.mark_seen_if_animating(self.focus);
        self.cancel_media_load();
        self.abort_prefetch();
        if let Some(cell) = self.focused_cell_mut() {
            cell.clear();
        }
        self.dismissed = true;
        tracing::debug!(reason, "Story session dismissed");
        self.signals.push(SessionSignal::Dismiss);
    }

    // ------------------------------------------------------------------------
    // Visibility
    // ------------------------------------------------------------------------

    /// View or app regained focus: resume playback or (re)start the load.
    ///
    /// While a block confirmation is open only the focus is recorded; the
    /// answer to the prompt decides whether playback resumes.
    pub fn on_became_focused(&mut self) {
        if self.dismissed {
            return;
        }
        self.view_focused = true;
        if self.block != BlockState::Idle {
            return;
        }
        if self.focused_cell().is_some_and(|cell| cell.cleared) {
            self.enter_company(self.focus);
            return;
        }
        match self.phase() {
            StoryPhase::Paused => self.resume_after_interruption(),
            StoryPhase::Ready => self.start_playback(),
            StoryPhase::Unloaded => self.load_current(),
            _ => {}
        }
    }

    /// View or app lost focus: pause whatever is playing.
    pub fn on_lost_focus(&mut self) {
        if self.dismissed {
            return;
        }
        self.view_focused = false;
        if self.block != BlockState::Idle {
            return;
        }
        if let Some(cell) = self.focused_cell_mut() {
            if cell.phase == StoryPhase::Playing {
                cell.timeline.pause();
                cell.phase = StoryPhase::Paused;
            }
        }
    }

    /// The cell of `companies[index]` scrolled out of view.
    ///
    /// A story still mid-play counts as seen. The cell's timeline and
    /// transient flags are cleared and its media load is cancelled.
    pub fn on_cell_exited_viewport(&mut self, index: usize) {
        let Some(company_id) = self.companies.get(index).map(|c| c.company_id) else {
            return;
        };
        self.mark_seen_if_animating(index);
        if let Some(cell) = self.cells.get_mut(&company_id) {
            cell.clear();
        }
        if index == self.focus {
            self.cancel_media_load();
            self.abort_prefetch();
        }
    }

    // ------------------------------------------------------------------------
    // Story navigation
    // ------------------------------------------------------------------------

    /// Sample the clock for the focused timeline.
    pub fn poll(&mut self) -> Option<TimelineEvent> {
        if self.dismissed {
            return None;
        }
        let event = self.focused_cell_mut()?.timeline.poll()?;
        self.apply_timeline_event(event);
        Some(event)
    }

    /// Tap on the right third: next story.
    pub fn tap_forward(&mut self) -> Option<TimelineEvent> {
        if self.dismissed || self.block != BlockState::Idle {
            return None;
        }
        let event = self.focused_cell_mut()?.timeline.skip()?;
        self.apply_timeline_event(event);
        Some(event)
    }

    /// Tap on the left third: previous story.
    pub fn tap_back(&mut self) -> Option<TimelineEvent> {
        if self.dismissed || self.block != BlockState::Idle {
            return None;
        }
        let event = self.focused_cell_mut()?.timeline.rewind()?;
        self.apply_timeline_event(event);
        Some(event)
    }

    /// Long press began.
    pub fn hold(&mut self) {
        if self.dismissed {
            return;
        }
        if let Some(cell) = self.focused_cell_mut() {
            if cell.phase == StoryPhase::Playing {
                cell.timeline.pause();
                cell.phase = StoryPhase::Paused;
                cell.holding = true;
            }
        }
    }

    /// Long press ended.
    pub fn release(&mut self) {
        if self.dismissed {
            return;
        }
        let can_play = self.view_focused && self.block == BlockState::Idle;
        if let Some(cell) = self.focused_cell_mut() {
            if !cell.holding {
                return;
            }
            cell.holding = false;
            if can_play && cell.phase == StoryPhase::Paused {
                cell.timeline.resume();
                cell.phase = StoryPhase::Playing;
            }
        }
    }

    fn apply_timeline_event(&mut self, event: TimelineEvent) {
        let from = self.focus;
        let was_animating = self.mark_seen_if_animating(from);
        let Some(company_id) = self.focused_id() else {
            return;
        };

        match event {
            TimelineEvent::IndexChanged(next) => {
                if let Some(cell) = self.cells.get_mut(&company_id) {
                    cell.enter_story(next);
                }
                self.signals.push(SessionSignal::StoryChanged {
                    company_id,
                    index: next,
                });
                self.load_current();
            }
            TimelineEvent::Finished(direction) => {
                self.cancel_media_load();
                if let Some(cell) = self.cells.get_mut(&company_id) {
                    cell.phase = if was_animating {
                        StoryPhase::Seen
                    } else {
                        StoryPhase::Unloaded
                    };
                    cell.ready_duration = None;
                }
                match direction {
                    Direction::Forward => self.advance_company(from),
                    Direction::Backward => self.retreat_company(from),
                }
            }
        }
    }

    /// Mark the current story of `companies[index]` seen when it was playing.
    fn mark_seen_if_animating(&mut self, index: usize) -> bool {
        let Some(company) = self.companies.get_mut(index) else {
            return false;
        };
        let Some(cell) = self.cells.get(&company.company_id) else {
            return false;
        };
        if !cell.phase.is_animating() {
            return false;
        }
        match company.stories.get_mut(cell.story_index) {
            Some(story) => {
                story.is_seen = true;
                tracing::debug!(story_id = %story.story_id, "Story seen");
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------------

    /// Media for `story_id` is playable. `duration` overrides the configured
    /// default (image duration, or the video fallback).
    ///
    /// Returns false when the report is stale: another company or story is
    /// focused, or the story is already playing.
    pub fn media_ready(
        &mut self,
        company_id: i64,
        story_id: &str,
        duration: Option<Duration>,
    ) -> bool {
        if self.dismissed || self.focused_id() != Some(company_id) {
            return false;
        }
        let Some(company) = self.companies.get(self.focus) else {
            return false;
        };
        let Some(cell) = self.cells.get_mut(&company_id) else {
            return false;
        };
        let Some(story) = company.stories.get(cell.story_index) else {
            return false;
        };
        if story.story_id != story_id
            || !matches!(
                cell.phase,
                StoryPhase::Unloaded | StoryPhase::Loading | StoryPhase::Ready
            )
        {
            return false;
        }

        let default = match story.kind {
            StoryKind::Image => self.settings.image_duration,
            StoryKind::Video => self.settings.video_fallback,
        };
        cell.ready_duration = Some(duration.unwrap_or(default));
        cell.phase = StoryPhase::Ready;
        self.media_handle = None;
        self.start_playback();
        true
    }

    fn start_playback(&mut self) {
        if !self.view_focused || self.block != BlockState::Idle || self.dismissed {
            return;
        }
        let fallback = self.settings.image_duration;
        if let Some(cell) = self.focused_cell_mut() {
            if cell.phase == StoryPhase::Ready {
                let duration = cell.ready_duration.unwrap_or(fallback);
                cell.timeline.animate(cell.story_index, duration);
                cell.phase = StoryPhase::Playing;
                tracing::debug!(story = cell.story_index, ?duration, "Story playing");
            }
        }
    }

    fn load_current(&mut self) {
        self.cancel_media_load();
        let Some(company) = self.companies.get(self.focus) else {
            return;
        };
        let company_id = company.company_id;
        let Some(cell) = self.cells.get_mut(&company_id) else {
            return;
        };
        let Some(story) = company.stories.get(cell.story_index) else {
            return;
        };
        cell.phase = StoryPhase::Loading;
        self.media_generation += 1;
        self.media_handle = Some(
            self.loader
                .spawn_load(company_id, story, self.media_generation),
        );
    }

    fn cancel_media_load(&mut self) {
        if let Some(handle) = self.media_handle.take() {
            handle.abort();
            tracing::debug!("Aborted media load");
        }
        // Anything still in the channel from the old load is now stale
        self.media_generation += 1;
    }

    fn prefetch_focused(&mut self) {
        self.abort_prefetch();
        let except = self.current_story().map(|s| s.story_id.clone());
        if let Some(company) = self.companies.get(self.focus) {
            self.prefetch_handle = Some(self.loader.spawn_prefetch(company, except.as_deref()));
        }
    }

    fn abort_prefetch(&mut self) {
        if let Some(handle) = self.prefetch_handle.take() {
            handle.abort();
        }
    }

    // ------------------------------------------------------------------------
    // Claps, blocks and links
    // ------------------------------------------------------------------------

    /// Clap the current story. Returns the visit's clap count for the
    /// optimistic visual, or `None` when the clap was not sent.
    ///
    /// `is_clapped` is only set when the server acknowledges.
    pub fn clap(&mut self) -> Option<u32> {
        if self.dismissed || !self.loader.network().is_reachable() {
            return None;
        }
        let max_claps = self.settings.max_claps;
        let company_id = self.focused_id()?;
        let story_index = {
            let cell = self.cells.get_mut(&company_id)?;
            if !cell.phase.is_animating() || cell.clap_number >= max_claps {
                return None;
            }
            cell.clap_number += 1;
            cell.story_index
        };
        let count = self.clap_number();
        let story_id = self.companies[self.focus]
            .stories
            .get(story_index)?
            .story_id
            .clone();

        let network = Arc::clone(self.loader.network());
        let tx = self.loader.events().clone();
        let url = self.settings.clap_url.clone();
        tracing::debug!(story_id = %story_id, count, "Clap");
        // Not tracked: a clap POST outlives the session
        spawn_reporting("clap", tx.clone(), async move {
            let clapped = match submit_clap(network.as_ref(), &url, &story_id, count).await {
                Ok(acked) => acked,
                Err(e) => {
                    tracing::warn!(story_id = %story_id, error = %e, "Clap submission failed");
                    false
                }
            };
            send_event(
                &tx,
                StoriesEvent::ClapAcked {
                    company_id,
                    story_id,
                    clapped,
                },
            )
            .await;
        });
        Some(count)
    }

    /// Menu → block. Pauses and raises [`SessionSignal::ConfirmBlock`].
    pub fn request_block(&mut self) -> bool {
        if self.dismissed
            || self.block != BlockState::Idle
            || !self.loader.network().is_reachable()
        {
            return false;
        }
        let Some(company) = self.companies.get(self.focus) else {
            return false;
        };
        let (company_id, name) = (company.company_id, company.name.clone());
        let Some(cell) = self.cells.get_mut(&company_id) else {
            return false;
        };
        if !cell.phase.is_animating() {
            return false;
        }
        if cell.phase == StoryPhase::Playing {
            cell.timeline.pause();
            cell.phase = StoryPhase::Paused;
        }
        self.block = BlockState::Confirming(company_id);
        self.signals
            .push(SessionSignal::ConfirmBlock { company_id, name });
        true
    }

    /// The user confirmed the block: send it. The outcome arrives as
    /// [`StoriesEvent::BlockResult`].
    pub fn confirm_block(&mut self) {
        let BlockState::Confirming(company_id) = self.block else {
            return;
        };
        self.block = BlockState::Submitting(company_id);

        let network = Arc::clone(self.loader.network());
        let tx = self.loader.events().clone();
        let url = self.settings.block_url.clone();
        spawn_reporting("block", tx.clone(), async move {
            let blocked = match submit_block(network.as_ref(), &url, company_id).await {
                Ok(acked) => acked,
                Err(e) => {
                    tracing::warn!(company_id, error = %e, "Block submission failed");
                    false
                }
            };
            send_event(
                &tx,
                StoriesEvent::BlockResult {
                    company_id,
                    blocked,
                },
            )
            .await;
        });
    }

    pub fn cancel_block(&mut self) {
        if let BlockState::Confirming(_) = self.block {
            self.block = BlockState::Idle;
            self.resume_after_interruption();
        }
    }

    fn resume_after_interruption(&mut self) {
        if !self.view_focused || self.dismissed {
            return;
        }
        if let Some(cell) = self.focused_cell_mut() {
            if cell.phase == StoryPhase::Paused && !cell.holding {
                cell.timeline.resume();
                cell.phase = StoryPhase::Playing;
            }
        }
    }

    /// Swipe up on the current story. Pauses playback when there is
    /// somewhere to go; the host calls `on_became_focused` on return.
    pub fn swipe_up(&mut self) -> Option<LinkAction> {
        if self.dismissed {
            return None;
        }
        let action = match &self.current_story()?.link {
            LinkInfo::None => None,
            LinkInfo::ExternalShowcase { url, .. } | LinkInfo::ExternalLink { url, .. } => {
                match normalize_link(url) {
                    Ok(url) => Some(LinkAction::OpenUrl(url)),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Ignoring unusable story link");
                        None
                    }
                }
            }
            LinkInfo::JobDetail { job_id, .. } if !job_id.is_empty() => {
                Some(LinkAction::JobDetail {
                    job_id: job_id.clone(),
                })
            }
            LinkInfo::JobDetail { .. } => None,
            LinkInfo::RecruiterProfile { profile, .. } => {
                Some(LinkAction::RecruiterProfile(profile.clone()))
            }
        };
        if action.is_some() {
            self.on_lost_focus();
        }
        action
    }

    /// Company icon tapped: the showcase to open, if the company has one.
    pub fn open_showcase(&mut self) -> Option<Showcase> {
        if self.dismissed || self.from_showcase {
            return None;
        }
        let showcase = self.focused_company()?.showcase.clone();
        if !showcase.has_showcase() {
            return None;
        }
        self.on_lost_focus();
        Some(showcase)
    }

    // ------------------------------------------------------------------------
    // Background results
    // ------------------------------------------------------------------------

    /// Apply a background result. Returns false when the event does not
    /// concern this session (the hub then applies it to its own list).
    pub fn handle_event(&mut self, event: &StoriesEvent) -> bool {
        match event {
            StoriesEvent::MediaReady {
                company_id,
                story_id,
                generation,
                duration,
            } => {
                if *generation != self.media_generation {
                    tracing::debug!(generation, current = self.media_generation, "Stale media result");
                    return true;
                }
                self.media_ready(*company_id, story_id, *duration);
                true
            }
            StoriesEvent::MediaFailed {
                company_id,
                story_id,
                generation,
                error,
            } => {
                if *generation != self.media_generation {
                    return true;
                }
                self.media_handle = None;
                if self.focused_id() == Some(*company_id) {
                    if let Some(cell) = self.focused_cell_mut() {
                        if cell.phase == StoryPhase::Loading {
                            cell.phase = StoryPhase::Unloaded;
                        }
                    }
                    tracing::warn!(company_id, story_id = %story_id, error = %error, "Story media unavailable");
                    self.signals.push(SessionSignal::MediaFailed {
                        company_id: *company_id,
                        story_id: story_id.clone(),
                    });
                }
                true
            }
            StoriesEvent::ClapAcked {
                company_id,
                story_id,
                clapped,
            } => self.apply_clap_ack(*company_id, story_id, *clapped),
            StoriesEvent::BlockResult {
                company_id,
                blocked,
            } => self.apply_block_result(*company_id, *blocked),
            _ => false,
        }
    }

    fn apply_clap_ack(&mut self, company_id: i64, story_id: &str, clapped: bool) -> bool {
        let Some(story) = self
            .companies
            .iter_mut()
            .filter(|c| c.company_id == company_id)
            .find_map(|c| c.story_mut(story_id))
        else {
            return false;
        };
        if clapped {
            story.is_clapped = true;
        } else {
            self.signals.push(SessionSignal::ClapFailed {
                company_id,
                story_id: story_id.to_string(),
            });
        }
        true
    }

    fn apply_block_result(&mut self, company_id: i64, blocked: bool) -> bool {
        let ours = self.block == BlockState::Submitting(company_id);
        if ours {
            self.block = BlockState::Idle;
        }

        if !blocked {
            if ours {
                self.resume_after_interruption();
            }
            return ours;
        }

        let present = self.companies.iter().any(|c| c.company_id == company_id);
        if ours {
            self.dismiss_session("company blocked");
        }
        self.companies.retain(|c| c.company_id != company_id);
        self.cells.remove(&company_id);
        tracing::info!(company_id, "Company blocked");
        present
    }

    // ------------------------------------------------------------------------
    // Session end
    // ------------------------------------------------------------------------

    /// End the session and hand the list back, fully seen companies moved to
    /// the end in rank order. Pending media loads are cancelled; clap and
    /// block POSTs keep running.
    pub fn finish(mut self) -> Vec<Company> {
        if !self.dismissed {
            self.mark_seen_if_animating(self.focus);
        }
        self.cancel_media_load();
        self.abort_prefetch();
        reorder(std::mem::take(&mut self.companies), ReorderMode::SessionExit)
    }
}

impl<N: Network> Drop for CarouselController<N> {
    fn drop(&mut self) {
        if let Some(handle) = self.media_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.prefetch_handle.take() {
            handle.abort();
        }
    }
}
