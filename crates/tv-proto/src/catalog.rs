//! Catalog extraction. Turns a loosely tabular markdown channel list into
//! an ordered list of `(name, url)` pairs.
//!
//! The document is fetched once from a [`CatalogSource`] and handed to a
//! [`CatalogParser`].  The default parser, [`LinkTableParser`], scans for
//! `name | [label](http...)` runs with a regex; anything smarter (a real
//! markdown table parser, say) only has to implement the trait.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::FetchError;

/// "non-pipe run, pipe, markdown link with an http(s) target".
/// `[^|]` deliberately spans newlines.
const LINK_ROW_PATTERN: &str = r"([^|]+)\|\s*\[[^\]]+\]\((http[^\s)]+)";

const USER_AGENT: &str = concat!("tvplay/", env!("CARGO_PKG_VERSION"));

// ── data model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
}

/// Channels in document order.  Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<ChannelEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<ChannelEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.entries.iter()
    }

    /// Display names, in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

impl FromIterator<ChannelEntry> for Catalog {
    fn from_iter<I: IntoIterator<Item = ChannelEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

// ── name cleanup ──────────────────────────────────────────────────────────────

/// Strips the category markers and trailing punctuation that the source
/// list hangs off channel names.
#[derive(Debug, Clone)]
pub struct NameCleaner {
    decorations: Vec<char>,
}

impl NameCleaner {
    pub fn new(decorations: &str) -> Self {
        Self {
            decorations: decorations.chars().collect(),
        }
    }

    /// Clean a raw name.  The steps are repeated until nothing changes, so
    /// `clean(clean(x)) == clean(x)` for every input.
    pub fn clean(&self, raw: &str) -> String {
        let mut current = self.clean_once(raw);
        loop {
            let next = self.clean_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn clean_once(&self, raw: &str) -> String {
        let name = raw.trim();
        let name = name
            .trim_end_matches(|c: char| self.decorations.contains(&c))
            .trim();
        name.trim_end_matches(|c: char| !(c.is_ascii_alphanumeric() || c.is_whitespace()))
            .trim()
            .to_string()
    }
}

impl Default for NameCleaner {
    fn default() -> Self {
        Self::new(&CatalogConfig::default().decorations)
    }
}

// ── parsing ───────────────────────────────────────────────────────────────────

pub trait CatalogParser {
    fn parse(&self, document: &str) -> Catalog;
}

/// Regex scraper for `| name | [label](http://...) |` style rows.
#[derive(Debug, Clone)]
pub struct LinkTableParser {
    pattern: Regex,
    cleaner: NameCleaner,
}

impl LinkTableParser {
    pub fn new(cleaner: NameCleaner) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(LINK_ROW_PATTERN)?,
            cleaner,
        })
    }
}

impl CatalogParser for LinkTableParser {
    fn parse(&self, document: &str) -> Catalog {
        self.pattern
            .captures_iter(document)
            .map(|caps| {
                let raw_name = caps.get(1).map_or("", |m| m.as_str());
                let raw_url = caps.get(2).map_or("", |m| m.as_str());
                ChannelEntry {
                    // An empty cleaned name is kept on purpose.
                    name: self.cleaner.clean(raw_name),
                    url: raw_url.trim().to_string(),
                }
            })
            .collect()
    }
}

// ── fetching ──────────────────────────────────────────────────────────────────

/// Catalog location, either an http(s):// URL or a local file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Remote { url: String },
    File { path: PathBuf },
}

impl CatalogSource {
    pub fn from_location(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Remote {
                url: location.to_string(),
            }
        } else {
            Self::File {
                path: PathBuf::from(location),
            }
        }
    }
}

impl std::fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { url } => f.write_str(url),
            Self::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches the raw document and runs it through a parser.
pub struct CatalogFetcher<P = LinkTableParser> {
    source: CatalogSource,
    client: reqwest::Client,
    parser: P,
}

impl CatalogFetcher<LinkTableParser> {
    pub fn from_config(config: &CatalogConfig) -> anyhow::Result<Self> {
        let parser = LinkTableParser::new(NameCleaner::new(&config.decorations))?;
        Ok(Self::new(
            CatalogSource::from_location(&config.source),
            Duration::from_secs(config.timeout_secs),
            parser,
        )?)
    }
}

impl<P: CatalogParser> CatalogFetcher<P> {
    pub fn new(source: CatalogSource, timeout: Duration, parser: P) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            source,
            client,
            parser,
        })
    }

    pub fn source(&self) -> &CatalogSource {
        &self.source
    }

    /// One bounded attempt at retrieving and parsing the catalog.  Safe to
    /// call again; every call builds a fresh catalog.
    pub async fn fetch_catalog(&self) -> Result<Catalog, FetchError> {
        let document = self.fetch_document().await?;
        debug!("catalog: fetched {} bytes from {}", document.len(), self.source);
        let catalog = self.parser.parse(&document);
        info!("Loaded {} channels from {}", catalog.len(), self.source);
        Ok(catalog)
    }

    /// Like [`fetch_catalog`](Self::fetch_catalog), but a fetch failure
    /// yields an empty catalog instead of an error.
    pub async fn load_catalog(&self) -> Catalog {
        match self.fetch_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Error fetching channels from {}: {}", self.source, e);
                Catalog::default()
            }
        }
    }

    async fn fetch_document(&self) -> Result<String, FetchError> {
        match &self.source {
            CatalogSource::Remote { url } => {
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status(status));
                }
                Ok(response.text().await?)
            }
            CatalogSource::File { path } => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| FetchError::Io {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = "\
# Finland

| #  | Channel        | Link  | Logo | EPG id |
|:--:|:--------------:|:-----:|:----:|:------:|
| 1  | YLE TV1 Ⓖ      | [>](https://yletv.akamaized.net/hls/live/622365/yletv1fin/index.m3u8) | <img height=\"20\" src=\"https://i.imgur.com/a.png\"/> | YleTV1.fi |
| 2  | MTV3!!         | [>](https://example.invalid/mtv3/master.m3u8) | <img height=\"20\" src=\"https://i.imgur.com/b.png\"/> | MTV3.fi |
| 3  | Kutonen Ⓨ      | [x]() | | |
";

    fn parser() -> LinkTableParser {
        LinkTableParser::new(NameCleaner::default()).unwrap()
    }

    #[test]
    fn cleans_documented_examples() {
        let cleaner = NameCleaner::default();
        assert_eq!(cleaner.clean("YLE TV1 Ⓖ@  "), "YLE TV1");
        assert_eq!(cleaner.clean("MTV3!!"), "MTV3");
        assert_eq!(cleaner.clean("  Jim  "), "Jim");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let cleaner = NameCleaner::default();
        let inputs = [
            "YLE TV1 Ⓖ@  ",
            "MTV3!!",
            "A@ !",
            "Ⓖ Ⓖ Ⓖ",
            ") ",
            "TV5 (FI) Ⓢ",
            "Hero ⓨ@ - ",
            "",
            "   ",
            "Nelonen\n",
            "ÄÄ ÖÖ",
        ];
        for raw in inputs {
            let once = cleaner.clean(raw);
            assert_eq!(cleaner.clean(&once), once, "input {:?}", raw);
        }
    }

    #[test]
    fn decorations_are_configurable() {
        let cleaner = NameCleaner::new("Ⓨ");
        assert_eq!(cleaner.clean("Kutonen ⓎⓎ"), "Kutonen");
        // '@' is not a decoration here, but step 3 still removes it
        assert_eq!(cleaner.clean("Kutonen @"), "Kutonen");
    }

    #[test]
    fn parses_rows_in_document_order() {
        let catalog = parser().parse(SAMPLE);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(0).unwrap().name, "YLE TV1");
        assert_eq!(
            catalog.get(0).unwrap().url,
            "https://yletv.akamaized.net/hls/live/622365/yletv1fin/index.m3u8"
        );
        assert_eq!(catalog.get(1).unwrap().name, "MTV3");
        assert_eq!(catalog.names(), vec!["YLE TV1", "MTV3"]);
    }

    #[test]
    fn second_link_in_a_row_yields_an_empty_name() {
        let doc = "| Ava | [>](http://a.example/1.m3u8) | [mirror](http://a.example/2.m3u8) |";
        let catalog = parser().parse(doc);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(0).unwrap().name, "Ava");
        assert_eq!(catalog.get(1).unwrap().name, "");
        assert_eq!(catalog.get(1).unwrap().url, "http://a.example/2.m3u8");
    }

    #[test]
    fn duplicates_are_preserved() {
        let doc = "| Hero | [>](http://x/1) |\n| Hero | [>](http://x/2) |\n";
        let catalog = parser().parse(doc);
        let urls: Vec<_> = catalog.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(catalog.names(), vec!["Hero", "Hero"]);
        assert_eq!(urls, vec!["http://x/1", "http://x/2"]);
    }

    #[test]
    fn non_http_links_are_ignored() {
        let doc = "| Local | [>](rtsp://10.0.0.1/stream) |\n| Nothing here |\n";
        assert!(parser().parse(doc).is_empty());
        assert!(parser().parse("").is_empty());
    }

    #[test]
    fn source_from_location() {
        assert_eq!(
            CatalogSource::from_location(" https://h/list.md "),
            CatalogSource::Remote {
                url: "https://h/list.md".into()
            }
        );
        assert_eq!(
            CatalogSource::from_location("lists/finland.md"),
            CatalogSource::File {
                path: PathBuf::from("lists/finland.md")
            }
        );
    }

    fn remote_fetcher(url: String, timeout: Duration) -> CatalogFetcher {
        CatalogFetcher::new(CatalogSource::Remote { url }, timeout, parser()).unwrap()
    }

    #[tokio::test]
    async fn fetches_remote_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lists/finland.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&server)
            .await;

        let fetcher = remote_fetcher(
            format!("{}/lists/finland.md", server.uri()),
            Duration::from_secs(10),
        );
        let catalog = fetcher.fetch_catalog().await.unwrap();
        assert_eq!(catalog.names(), vec!["YLE TV1", "MTV3"]);

        // a second fetch is independent and yields the same catalog
        assert_eq!(fetcher.fetch_catalog().await.unwrap(), catalog);
    }

    #[tokio::test]
    async fn http_error_status_is_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = remote_fetcher(server.uri(), Duration::from_secs(10));
        match fetcher.fetch_catalog().await {
            Err(FetchError::Status(status)) => assert_eq!(status.as_u16(), 404),
            other => panic!("expected status error, got {:?}", other),
        }
        assert!(fetcher.load_catalog().await.is_empty());
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(SAMPLE)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = remote_fetcher(server.uri(), Duration::from_millis(200));
        assert!(matches!(
            fetcher.fetch_catalog().await,
            Err(FetchError::Transport(_))
        ));
        assert!(fetcher.load_catalog().await.is_empty());
    }

    #[tokio::test]
    async fn reads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("finland.md");
        std::fs::write(&file, SAMPLE).unwrap();

        let config = CatalogConfig {
            source: file.display().to_string(),
            ..CatalogConfig::default()
        };
        let fetcher = CatalogFetcher::from_config(&config).unwrap();
        assert_eq!(fetcher.load_catalog().await.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let fetcher = CatalogFetcher::new(
            CatalogSource::File {
                path: PathBuf::from("/nonexistent/tvplay/list.md"),
            },
            Duration::from_secs(1),
            parser(),
        )
        .unwrap();
        assert!(matches!(
            fetcher.fetch_catalog().await,
            Err(FetchError::Io { .. })
        ));
    }
}
