//! Company and story data model.
//!
//! `Company` and `Story` are plain owned values: the hub, the reconciler and
//! each carousel session hold their own copies and hand them back explicitly.
//! `is_seen` / `is_clapped` on [`Story`] are local-only flags; the feed never
//! sets them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Company
// ============================================================================

/// A company and its ordered stories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub company_id: i64,
    /// `storyCompanyId` in the feed; also the cache key of the company logo.
    pub external_id: String,
    pub name: String,
    pub logo_url: String,
    pub story_count: i64,
    pub updated_at: i64,
    /// 1-based position in the server response.
    pub rank: u32,
    pub showcase: Showcase,
    pub stories: Vec<Story>,
}

impl Company {
    /// True when every story has been seen. A company without stories counts
    /// as seen, though such companies never survive validation.
    pub fn all_seen(&self) -> bool {
        self.stories.iter().all(|s| s.is_seen)
    }

    /// Index of the first story not yet seen.
    pub fn first_unseen(&self) -> Option<usize> {
        self.stories.iter().position(|s| !s.is_seen)
    }

    pub fn story(&self, story_id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.story_id == story_id)
    }

    pub fn story_mut(&mut self, story_id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.story_id == story_id)
    }
}

/// Showcase page metadata attached to a company.
///
/// Every field defaults to an empty string when the feed omits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Showcase {
    pub company_id: String,
    pub banner_url: String,
    pub json_file_path: String,
    pub template_type: String,
    pub showcase_id: String,
    pub company_name: String,
    pub banner_button_text: String,
}

impl Showcase {
    /// The company icon only leads somewhere when a showcase id is present.
    pub fn has_showcase(&self) -> bool {
        !self.showcase_id.is_empty()
    }
}

// ============================================================================
// Story
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoryKind {
    Image,
    Video,
}

impl StoryKind {
    /// Feed encoding: 1 = image, 2 = video. Anything else plays as an image.
    pub fn from_feed(story_type: i64) -> Self {
        match story_type {
            2 => StoryKind::Video,
            _ => StoryKind::Image,
        }
    }

    pub fn as_feed(self) -> i64 {
        match self {
            StoryKind::Image => 1,
            StoryKind::Video => 2,
        }
    }
}

/// One story of a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub story_id: String,
    pub kind: StoryKind,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub view_count: i64,
    pub clap_count: i64,
    pub thumbnail_url: String,
    pub media_url: String,
    pub is_seen: bool,
    pub is_clapped: bool,
    pub link: LinkInfo,
}

impl Story {
    /// True once `expires_at` is set and lies in the past.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at > 0 && self.expires_at <= now_ms
    }
}

/// Playback lifecycle of the story a cell is showing.
///
/// `Paused` only ever follows `Playing`; `Seen` is terminal for the visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryPhase {
    Unloaded,
    Loading,
    Ready,
    Playing,
    Paused,
    Seen,
}

impl StoryPhase {
    /// Playing or paused mid-play: leaving the story now marks it seen.
    pub fn is_animating(self) -> bool {
        matches!(self, StoryPhase::Playing | StoryPhase::Paused)
    }
}

// ============================================================================
// Link Info
// ============================================================================

/// Swipe-up destination of a story, decoded once at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkInfo {
    #[default]
    None,
    ExternalShowcase {
        url: String,
        text: String,
    },
    JobDetail {
        url: String,
        job_id: String,
    },
    RecruiterProfile {
        url: String,
        profile: RecruiterProfile,
    },
    ExternalLink {
        url: String,
        text: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruiterProfile {
    pub designation: String,
    pub email: String,
    pub id: i64,
    pub image: String,
    pub name: String,
    pub organisation: String,
    pub phone: String,
}

impl LinkInfo {
    /// Feed `linkType` code of this variant.
    pub fn link_type(&self) -> i64 {
        match self {
            LinkInfo::None => 0,
            LinkInfo::ExternalShowcase { .. } => 1,
            LinkInfo::JobDetail { .. } => 2,
            LinkInfo::RecruiterProfile { .. } => 3,
            LinkInfo::ExternalLink { .. } => 4,
        }
    }

    /// Label shown next to the swipe-up arrow, if any.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            LinkInfo::None => None,
            LinkInfo::ExternalShowcase { text, .. } | LinkInfo::ExternalLink { text, .. } => {
                Some(text.as_str())
            }
            LinkInfo::JobDetail { .. } => Some("Swipe up for job details."),
            LinkInfo::RecruiterProfile { .. } => Some("Swipe up for recruiter profile."),
        }
    }
}
