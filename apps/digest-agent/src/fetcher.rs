use async_trait::async_trait;
use atom_syndication::Feed;
use gemini_engine::extract_domain;
use rss::Channel;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
}

impl FeedEntry {
    /// One line of the news list handed to the model.
    pub fn render(&self) -> String {
        format!("・{} ({})", self.title, self.link)
    }
}

pub fn render_entries(entries: &[FeedEntry]) -> String {
    entries
        .iter()
        .map(FeedEntry::render)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed server returned HTTP {0}")]
    Status(u16),

    #[error("response is neither RSS nor Atom ({0})")]
    Parse(String),

    #[error("feed contains no usable entries")]
    Empty,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, FetchError>;
}

pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    max_entries: usize,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, max_entries: usize) -> Self {
        HttpFeedSource {
            client,
            url: url.into(),
            max_entries,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(skip(self), fields(feed_domain = %extract_domain(&self.url)))]
    async fn fetch(&self) -> Result<Vec<FeedEntry>, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content = response.bytes().await?;
        let entries = parse_feed(&content, self.max_entries)?;
        debug!(count = entries.len(), "Fetched feed entries");

        Ok(entries)
    }
}

/// Parse an RSS 2.0 or Atom document and keep the first `limit` entries.
/// Entries without a title or link are dropped after the limit is applied.
pub fn parse_feed(content: &[u8], limit: usize) -> Result<Vec<FeedEntry>, FetchError> {
    let (considered, entries): (usize, Vec<FeedEntry>) = match Channel::read_from(content) {
        Ok(channel) => {
            let items = &channel.items()[..channel.items().len().min(limit)];
            let entries = items
                .iter()
                .filter_map(|item| entry_from(item.title(), item.link()))
                .collect();
            (items.len(), entries)
        }
        Err(rss_err) => match Feed::read_from(content) {
            Ok(feed) => {
                let items = &feed.entries()[..feed.entries().len().min(limit)];
                let entries = items
                    .iter()
                    .filter_map(|entry| entry_from(Some(entry.title().as_str()), atom_link(entry)))
                    .collect();
                (items.len(), entries)
            }
            Err(atom_err) => {
                return Err(FetchError::Parse(format!("rss: {}; atom: {}", rss_err, atom_err)));
            }
        },
    };

    if entries.len() < considered {
        debug!(skipped = considered - entries.len(), "Skipped entries without title or link");
    }

    if entries.is_empty() {
        return Err(FetchError::Empty);
    }

    Ok(entries)
}

fn entry_from(title: Option<&str>, link: Option<&str>) -> Option<FeedEntry> {
    let title = title.map(single_line).filter(|t| !t.is_empty())?;
    let link = link.map(single_line).filter(|l| !l.is_empty())?;
    Some(FeedEntry { title, link })
}

/// Each entry must render as exactly one line, so wrapped titles are flattened.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn atom_link(entry: &atom_syndication::Entry) -> Option<&str> {
    let links = entry.links();
    links
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| links.first())
        .map(|l| l.href())
}
