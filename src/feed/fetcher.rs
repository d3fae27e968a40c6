use super::parser::{parse_feed, ParseResult};
use super::FeedError;
use crate::model::Company;
use crate::net::Network;

/// Fetch and decode the company list.
///
/// Returns raw server data: validation, sorting and flag merging are left to
/// the reconciler.
///
/// # Errors
///
/// - [`FeedError::Network`] - the GET failed (after the network's own retries)
/// - [`FeedError::Rejected`] - the server answered with `success != 1`
/// - [`FeedError::Malformed`] - no `companyStories` array
pub async fn fetch_companies<N: Network>(
    network: &N,
    feed_url: &str,
) -> Result<Vec<Company>, FeedError> {
    let body = network.get_json(feed_url).await?;
    let ParseResult { companies, skipped } = parse_feed(&body)?;

    if skipped > 0 {
        tracing::warn!(feed = %feed_url, skipped, "Stories without an id skipped");
    }
    tracing::debug!(feed = %feed_url, companies = companies.len(), "Fetched stories feed");

    Ok(companies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::fake::FakeNetwork;
    use crate::net::NetworkError;
    use serde_json::json;

    const URL: &str = "https://feed.test/stories";

    #[tokio::test]
    async fn test_fetch_success() {
        let net = FakeNetwork::new();
        net.serve_json(
            URL,
            json!({
                "success": 1,
                "companyStories": [{
                    "companyId": 1,
                    "storyCount": 1,
                    "stories": [{ "storyId": "a", "createdOn": 5 }]
                }]
            }),
        );

        let companies = fetch_companies(&net, URL).await.unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].stories[0].story_id, "a");
    }

    #[tokio::test]
    async fn test_fetch_rejected() {
        let net = FakeNetwork::new();
        net.serve_json(URL, json!({ "success": 0 }));
        assert!(matches!(
            fetch_companies(&net, URL).await,
            Err(FeedError::Rejected(0))
        ));
    }

    #[tokio::test]
    async fn test_fetch_network_failure() {
        let net = FakeNetwork::new();
        assert!(matches!(
            fetch_companies(&net, URL).await,
            Err(FeedError::Network(NetworkError::HttpStatus(404)))
        ));
    }
}
