use serde_json::{Map, Value};

use super::FeedError;
use crate::model::{Company, LinkInfo, RecruiterProfile, Showcase, Story, StoryKind};

/// Companies decoded from one feed response, in server order.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub companies: Vec<Company>,
    /// Stories dropped for lacking an id.
    pub skipped: usize,
}

/// Decode a feed response body.
///
/// `success != 1` is a rejection; a missing or non-array `companyStories`
/// is malformed. Individual fields are loosely typed and fall back to
/// empty strings and zeros. Local flags start unset.
pub fn parse_feed(body: &Value) -> Result<ParseResult, FeedError> {
    let success = int(body, "success");
    if success != 1 {
        return Err(FeedError::Rejected(success));
    }

    let entries = body
        .get("companyStories")
        .and_then(Value::as_array)
        .ok_or_else(|| FeedError::Malformed("missing companyStories".to_string()))?;

    let mut skipped = 0;
    let companies = entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let entry = entry.as_object()?;
            let rank = u32::try_from(i + 1).unwrap_or(u32::MAX);
            Some(parse_company(entry, rank, &mut skipped))
        })
        .collect();

    Ok(ParseResult { companies, skipped })
}

fn parse_company(entry: &Map<String, Value>, rank: u32, skipped: &mut usize) -> Company {
    let stories = entry
        .get("stories")
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(Value::as_object)
                .filter_map(|s| {
                    let story = parse_story(s);
                    if story.is_none() {
                        *skipped += 1;
                    }
                    story
                })
                .collect()
        })
        .unwrap_or_default();

    let showcase = entry
        .get("showcaseDetail")
        .and_then(Value::as_object)
        .map(parse_showcase)
        .unwrap_or_default();

    Company {
        company_id: int_of(entry, "companyId"),
        external_id: text_of(entry, "storyCompanyId"),
        name: text_of(entry, "companyName"),
        logo_url: text_of(entry, "companyLogo"),
        story_count: int_of(entry, "storyCount"),
        updated_at: int_of(entry, "storyUpdatedOn"),
        rank,
        showcase,
        stories,
    }
}

fn parse_showcase(raw: &Map<String, Value>) -> Showcase {
    Showcase {
        company_id: text_of(raw, "v2companyId"),
        banner_url: text_of(raw, "v2bannerUrl"),
        json_file_path: text_of(raw, "v2jsonFilePath"),
        template_type: text_of(raw, "v2templateType"),
        showcase_id: text_of(raw, "v2showcaseId"),
        company_name: text_of(raw, "v2companyName"),
        banner_button_text: text_of(raw, "v2bannerBtnTxt"),
    }
}

fn parse_story(raw: &Map<String, Value>) -> Option<Story> {
    let story_id = text_of(raw, "storyId");
    if story_id.is_empty() {
        return None;
    }

    Some(Story {
        story_id,
        kind: StoryKind::from_feed(int_of(raw, "storyType")),
        created_at: int_of(raw, "createdOn"),
        expires_at: int_of(raw, "expiryOn"),
        view_count: int_of(raw, "totalViewCount"),
        clap_count: int_of(raw, "totalClapCount"),
        thumbnail_url: text_of(raw, "thumbnailPath"),
        media_url: text_of(raw, "s3Path"),
        is_seen: false,
        is_clapped: false,
        link: parse_link(raw),
    })
}

/// Decode `(linkType, linkUrl, linkText, linkData)` into a [`LinkInfo`].
pub fn parse_link(raw: &Map<String, Value>) -> LinkInfo {
    let url = text_of(raw, "linkUrl");
    // Job and recruiter links carry their payload as the first element of linkData
    let first_data = raw
        .get("linkData")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_object);

    match int_of(raw, "linkType") {
        1 => LinkInfo::ExternalShowcase {
            url,
            text: text_of(raw, "linkText"),
        },
        2 => match first_data {
            Some(data) => LinkInfo::JobDetail {
                url,
                job_id: text_of(data, "jobId"),
            },
            None => LinkInfo::None,
        },
        3 => match first_data {
            Some(data) => LinkInfo::RecruiterProfile {
                url,
                profile: RecruiterProfile {
                    // The API spells this key "desgination"
                    designation: text_of(data, "desgination"),
                    email: text_of(data, "email"),
                    id: int_of(data, "id"),
                    image: text_of(data, "image"),
                    name: text_of(data, "name"),
                    organisation: text_of(data, "organisation"),
                    phone: text_of(data, "phone"),
                },
            },
            None => LinkInfo::None,
        },
        4 => LinkInfo::ExternalLink {
            url,
            text: text_of(raw, "linkText"),
        },
        _ => LinkInfo::None,
    }
}

fn text_of(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn int_of(map: &Map<String, Value>, key: &str) -> i64 {
    match map.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn int(value: &Value, key: &str) -> i64 {
    value.as_object().map(|m| int_of(m, key)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn story_json(id: &str, created: i64) -> Value {
        json!({
            "storyId": id,
            "storyType": 1,
            "createdOn": created,
            "expiryOn": created + 86_400_000,
            "totalViewCount": 10,
            "totalClapCount": 2,
            "thumbnailPath": format!("https://cdn.test/{id}_t.jpg"),
            "s3Path": format!("https://cdn.test/{id}.jpg"),
            "linkType": 0,
            "linkUrl": ""
        })
    }

    #[test]
    fn test_parse_full_company() {
        let body = json!({
            "success": 1,
            "companyStories": [{
                "companyName": "Acme",
                "companyId": 77,
                "storyCompanyId": "acme-77",
                "storyCount": 2,
                "storyUpdatedOn": 1_591_017_038_380i64,
                "companyLogo": "https://cdn.test/acme.png",
                "showcaseDetail": {
                    "v2showcaseId": "sc-1",
                    "v2bannerBtnTxt": "Visit"
                },
                "stories": [story_json("s1", 100), story_json("s2", 200)]
            }]
        });

        let result = parse_feed(&body).unwrap();
        assert_eq!(result.skipped, 0);
        let company = &result.companies[0];
        assert_eq!(company.company_id, 77);
        assert_eq!(company.external_id, "acme-77");
        assert_eq!(company.rank, 1);
        assert_eq!(company.story_count, 2);
        assert!(company.showcase.has_showcase());
        assert_eq!(company.showcase.banner_button_text, "Visit");
        assert_eq!(company.stories[1].media_url, "https://cdn.test/s2.jpg");
        assert!(!company.stories[0].is_seen);
    }

    #[test]
    fn test_ranks_follow_server_order() {
        let body = json!({
            "success": 1,
            "companyStories": [
                { "companyId": 5, "storyCount": 0, "stories": [] },
                { "companyId": 3, "storyCount": 0, "stories": [] }
            ]
        });
        let companies = parse_feed(&body).unwrap().companies;
        assert_eq!(companies[0].rank, 1);
        assert_eq!(companies[1].rank, 2);
        assert_eq!(companies[1].company_id, 3);
    }

    #[test]
    fn test_rejected_and_malformed() {
        assert!(matches!(
            parse_feed(&json!({ "success": 0, "companyStories": [] })),
            Err(FeedError::Rejected(0))
        ));
        assert!(matches!(
            parse_feed(&json!({ "success": 1 })),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            parse_feed(&json!([])),
            Err(FeedError::Rejected(0))
        ));
    }

    #[test]
    fn test_loose_fields_default() {
        let body = json!({
            "success": 1,
            "companyStories": [{
                "companyId": "12",
                "companyName": null,
                "stories": [{ "storyId": 991, "storyType": 7 }]
            }]
        });
        let company = &parse_feed(&body).unwrap().companies[0];
        assert_eq!(company.company_id, 12);
        assert_eq!(company.name, "");
        assert_eq!(company.story_count, 0);
        assert_eq!(company.stories[0].story_id, "991");
        assert_eq!(company.stories[0].kind, StoryKind::Image);
        assert_eq!(company.showcase, Showcase::default());
    }

    #[test]
    fn test_story_without_id_skipped() {
        let body = json!({
            "success": 1,
            "companyStories": [{
                "companyId": 1,
                "storyCount": 2,
                "stories": [story_json("s1", 1), { "storyType": 2 }]
            }]
        });
        let result = parse_feed(&body).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.companies[0].stories.len(), 1);
    }

    #[test]
    fn test_link_types() {
        let showcase = json!({ "linkType": 1, "linkUrl": "acme.com", "linkText": "Our office" });
        assert_eq!(
            parse_link(showcase.as_object().unwrap()),
            LinkInfo::ExternalShowcase {
                url: "acme.com".into(),
                text: "Our office".into()
            }
        );

        let job = json!({ "linkType": 2, "linkUrl": "", "linkData": [{ "jobId": "J-1" }] });
        assert_eq!(
            parse_link(job.as_object().unwrap()),
            LinkInfo::JobDetail {
                url: String::new(),
                job_id: "J-1".into()
            }
        );

        let external = json!({ "linkType": 4, "linkUrl": "https://x.test" });
        assert_eq!(
            parse_link(external.as_object().unwrap()),
            LinkInfo::ExternalLink {
                url: "https://x.test".into(),
                text: String::new()
            }
        );
    }

    #[test]
    fn test_recruiter_profile_reads_misspelled_key() {
        let raw = json!({
            "linkType": 3,
            "linkUrl": "",
            "linkData": [{
                "desgination": "Talent Lead",
                "email": "r@acme.test",
                "id": 55,
                "name": "Sam"
            }]
        });
        match parse_link(raw.as_object().unwrap()) {
            LinkInfo::RecruiterProfile { profile, .. } => {
                assert_eq!(profile.designation, "Talent Lead");
                assert_eq!(profile.id, 55);
                assert_eq!(profile.phone, "");
            }
            other => panic!("Expected RecruiterProfile, got {:?}", other),
        }
    }

    #[test]
    fn test_link_degrades_to_none() {
        for raw in [
            json!({ "linkType": 2, "linkData": [] }),
            json!({ "linkType": 3 }),
            json!({ "linkType": 9, "linkUrl": "https://x.test" }),
            json!({}),
        ] {
            assert_eq!(parse_link(raw.as_object().unwrap()), LinkInfo::None);
        }
    }
}
