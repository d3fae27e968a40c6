use std::collections::HashMap;

use super::schema::Database;
use super::types::{CompanyRow, StorageError, StoryRow};
use crate::model::Company;

impl Database {
    // ========================================================================
    // Company List Operations
    // ========================================================================

    /// Load the persisted company list in saved order.
    pub async fn load_companies(&self) -> Result<Vec<Company>, StorageError> {
        let company_rows: Vec<CompanyRow> = sqlx::query_as(
            r#"
            SELECT position, company_id, external_id, name, logo_url,
                   story_count, updated_at, rank, showcase
            FROM companies
            ORDER BY position
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let story_rows: Vec<StoryRow> = sqlx::query_as(
            r#"
            SELECT company_position, story_id, kind, created_at, expires_at,
                   view_count, clap_count, thumbnail_url, media_url,
                   is_seen, is_clapped, link
            FROM stories
            ORDER BY company_position, position
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stories_by_company: HashMap<i64, Vec<_>> = HashMap::new();
        for row in story_rows {
            let position = row.company_position;
            stories_by_company
                .entry(position)
                .or_default()
                .push(row.into_story()?);
        }

        let companies = company_rows
            .into_iter()
            .map(|row| {
                let stories = stories_by_company.remove(&row.position).unwrap_or_default();
                row.into_company(stories)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(companies = companies.len(), "Loaded persisted companies");
        Ok(companies)
    }

    /// Replace the persisted list with `companies` in one transaction.
    ///
    /// A failure leaves the previous list intact.
    pub async fn save_companies(&self, companies: &[Company]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM stories").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM companies").execute(&mut *tx).await?;

        for (position, company) in companies.iter().enumerate() {
            let position = position as i64;
            sqlx::query(
                r#"
                INSERT INTO companies
                    (position, company_id, external_id, name, logo_url,
                     story_count, updated_at, rank, showcase)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(position)
            .bind(company.company_id)
            .bind(&company.external_id)
            .bind(&company.name)
            .bind(&company.logo_url)
            .bind(company.story_count)
            .bind(company.updated_at)
            .bind(i64::from(company.rank))
            .bind(serde_json::to_string(&company.showcase)?)
            .execute(&mut *tx)
            .await?;

            for (story_position, story) in company.stories.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO stories
                        (company_position, position, story_id, kind, created_at,
                         expires_at, view_count, clap_count, thumbnail_url,
                         media_url, is_seen, is_clapped, link)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                )
                .bind(position)
                .bind(story_position as i64)
                .bind(&story.story_id)
                .bind(story.kind.as_feed())
                .bind(story.created_at)
                .bind(story.expires_at)
                .bind(story.view_count)
                .bind(story.clap_count)
                .bind(&story.thumbnail_url)
                .bind(&story.media_url)
                .bind(story.is_seen)
                .bind(story.is_clapped)
                .bind(serde_json::to_string(&story.link)?)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(companies = companies.len(), "Saved company list");
        Ok(())
    }

    /// Delete every persisted company and story.
    pub async fn purge_all(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM stories").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM companies").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkInfo, RecruiterProfile, Showcase, Story, StoryKind};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn story(id: &str, created_at: i64) -> Story {
        Story {
            story_id: id.to_string(),
            kind: StoryKind::Video,
            created_at,
            expires_at: created_at + 1000,
            view_count: 3,
            clap_count: 1,
            thumbnail_url: format!("https://cdn.test/{id}_t.jpg"),
            media_url: format!("https://cdn.test/{id}.mp4"),
            is_seen: false,
            is_clapped: false,
            link: LinkInfo::None,
        }
    }

    fn company(id: i64, stories: Vec<Story>) -> Company {
        Company {
            company_id: id,
            external_id: format!("ext-{id}"),
            name: format!("Company {id}"),
            logo_url: format!("https://cdn.test/logo-{id}.png"),
            story_count: stories.len() as i64,
            updated_at: 42,
            rank: id as u32,
            showcase: Showcase::default(),
            stories,
        }
    }

    #[tokio::test]
    async fn test_empty_database_loads_nothing() {
        let db = test_db().await;
        assert!(db.load_companies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order_and_flags() {
        let db = test_db().await;

        let mut seen = story("b1", 10);
        seen.is_seen = true;
        seen.is_clapped = true;
        seen.link = LinkInfo::RecruiterProfile {
            url: String::new(),
            profile: RecruiterProfile {
                name: "Sam".into(),
                id: 9,
                ..RecruiterProfile::default()
            },
        };
        let mut second = company(2, vec![seen, story("b2", 20)]);
        second.showcase.showcase_id = "sc-2".into();

        let companies = vec![second, company(1, vec![story("a1", 5)])];
        db.save_companies(&companies).await.unwrap();

        let loaded = db.load_companies().await.unwrap();
        assert_eq!(loaded, companies);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_list() {
        let db = test_db().await;
        db.save_companies(&[company(1, vec![story("a", 1)]), company(2, vec![story("b", 1)])])
            .await
            .unwrap();
        db.save_companies(&[company(3, vec![story("c", 1)])])
            .await
            .unwrap();

        let loaded = db.load_companies().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].company_id, 3);
    }

    #[tokio::test]
    async fn test_duplicate_company_ids_survive() {
        let db = test_db().await;
        let companies = vec![company(7, vec![story("a", 1)]), company(7, vec![story("b", 2)])];
        db.save_companies(&companies).await.unwrap();
        assert_eq!(db.load_companies().await.unwrap(), companies);
    }

    #[tokio::test]
    async fn test_purge_all() {
        let db = test_db().await;
        db.save_companies(&[company(1, vec![story("a", 1)])])
            .await
            .unwrap();
        db.purge_all().await.unwrap();
        assert!(db.load_companies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_link_column_reported() {
        let db = test_db().await;
        db.save_companies(&[company(1, vec![story("a", 1)])])
            .await
            .unwrap();
        sqlx::query("UPDATE stories SET link = 'not json'")
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(matches!(
            db.load_companies().await,
            Err(StorageError::Serde(_))
        ));
    }
}
