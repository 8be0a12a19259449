//! Feed request construction

use url::Url;

use crate::config::{Credentials, StreamConfig};
use crate::streaming::Cursor;

/// A fully resolved feed request
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Target URL, query included
    pub url: Url,
    /// Basic auth sent at the transport level
    pub credentials: Option<Credentials>,
}

impl FeedRequest {
    /// Build the `_changes` request for `config`, resuming after `since`
    ///
    /// Query parameters are only added when their value is present and always
    /// in the same order.
    pub fn build(config: &StreamConfig, since: Option<&Cursor>) -> Result<Self, url::ParseError> {
        let host = if config.host.contains(':') && !config.host.starts_with('[') {
            format!("[{}]", config.host)
        } else {
            config.host.clone()
        };

        let mut url = Url::parse(&format!(
            "{}://{}:{}/",
            config.protocol.scheme(),
            host,
            config.port
        ))?;

        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .clear()
            .push(&config.database)
            .push("_changes");

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("feed", "continuous");
            query.append_pair("heartbeat", &config.heartbeat_millis().to_string());
            if config.include_docs {
                query.append_pair("include_docs", "true");
            }
            if let Some(conflicts) = config.conflicts {
                query.append_pair("conflicts", if conflicts { "true" } else { "false" });
            }
            if let Some(since) = since.filter(|c| !c.is_empty()) {
                query.append_pair("since", since.as_str());
            }
            if let Some(filter) = &config.filter {
                query.append_pair("filter", filter);
            }
            if let Some(style) = config.style {
                query.append_pair("style", style.as_str());
            }
        }

        Ok(Self {
            url,
            credentials: config.credentials.clone(),
        })
    }

    /// Value of a query parameter, if present
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}
