use sqlx::FromRow;
use thiserror::Error;

use crate::model::{Company, LinkInfo, Showcase, Story, StoryKind};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process holds the database lock
    #[error("Another instance of stories appears to be running. Please close it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A JSON column could not be encoded or decoded
    #[error("Stored data is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    /// Map lock-related sqlx errors to [`StorageError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Database(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, FromRow)]
pub(crate) struct CompanyRow {
    pub position: i64,
    pub company_id: i64,
    pub external_id: String,
    pub name: String,
    pub logo_url: String,
    pub story_count: i64,
    pub updated_at: i64,
    pub rank: i64,
    pub showcase: String,
}

impl CompanyRow {
    pub(crate) fn into_company(self, stories: Vec<Story>) -> Result<Company, StorageError> {
        let showcase: Showcase = serde_json::from_str(&self.showcase)?;
        Ok(Company {
            company_id: self.company_id,
            external_id: self.external_id,
            name: self.name,
            logo_url: self.logo_url,
            story_count: self.story_count,
            updated_at: self.updated_at,
            rank: u32::try_from(self.rank).unwrap_or(0),
            showcase,
            stories,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct StoryRow {
    pub company_position: i64,
    pub story_id: String,
    pub kind: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub view_count: i64,
    pub clap_count: i64,
    pub thumbnail_url: String,
    pub media_url: String,
    pub is_seen: bool,
    pub is_clapped: bool,
    pub link: String,
}

impl StoryRow {
    pub(crate) fn into_story(self) -> Result<Story, StorageError> {
        let link: LinkInfo = serde_json::from_str(&self.link)?;
        Ok(Story {
            story_id: self.story_id,
            kind: StoryKind::from_feed(self.kind),
            created_at: self.created_at,
            expires_at: self.expires_at,
            view_count: self.view_count,
            clap_count: self.clap_count,
            thumbnail_url: self.thumbnail_url,
            media_url: self.media_url,
            is_seen: self.is_seen,
            is_clapped: self.is_clapped,
            link,
        })
    }
}
