//! Feed fetching and parsing
//!
//! Only the item title, link and publish date are consumed. When an item has
//! no `<link>`, the `<enclosure url="...">` is used instead.

use crate::error::SeedwatchError;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::Client;
use seedwatch_types::FeedItem;
use std::time::Duration;
use tracing::debug;

/// Source of feed items for a subscription URL
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, SeedwatchError>;
}

/// [`FeedSource`] over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self, SeedwatchError> {
        let client = Client::builder()
            .user_agent(concat!("Seedwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, SeedwatchError> {
        debug!("Fetching feed {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        parse_feed(&body)
    }
}

/// Parse RSS `<item>` elements from raw XML bytes
pub fn parse_feed(xml: &[u8]) -> Result<Vec<FeedItem>, SeedwatchError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut buf = Vec::new();

    let mut current_item: Option<FeedItemBuilder> = None;
    let mut current_element = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                if name == "item" {
                    current_item = Some(FeedItemBuilder::default());
                } else if let Some(ref mut item) = current_item {
                    item.take_enclosure(&e, &name)?;
                }
                current_element = name;
            }
            Ok(Event::Empty(e)) => {
                if let Some(ref mut item) = current_item {
                    item.take_enclosure(&e, &element_name(&e))?;
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current_item.take().and_then(FeedItemBuilder::build) {
                        items.push(item);
                    }
                }
                current_element.clear();
            }
            Ok(Event::Text(e)) => {
                if let Some(ref mut item) = current_item {
                    let text = e
                        .unescape()
                        .map_err(|e| SeedwatchError::Feed(format!("XML parse error: {}", e)))?
                        .to_string();
                    item.set(&current_element, text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(ref mut item) = current_item {
                    let text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                    item.set(&current_element, text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SeedwatchError::Feed(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

#[derive(Default)]
struct FeedItemBuilder {
    title: Option<String>,
    link: Option<String>,
    enclosure: Option<String>,
    published: Option<String>,
}

impl FeedItemBuilder {
    fn set(&mut self, element: &str, text: String) {
        if text.is_empty() {
            return;
        }
        match element {
            "title" => self.title = Some(text),
            "link" => self.link = Some(text),
            "pubDate" | "published" | "dc:date" => self.published = Some(text),
            _ => {}
        }
    }

    fn take_enclosure(&mut self, e: &BytesStart<'_>, name: &str) -> Result<(), SeedwatchError> {
        if name != "enclosure" {
            return Ok(());
        }
        let attr = e
            .try_get_attribute("url")
            .map_err(|e| SeedwatchError::Feed(format!("bad enclosure: {}", e)))?;
        if let Some(attr) = attr {
            let url = attr
                .unescape_value()
                .map_err(|e| SeedwatchError::Feed(format!("bad enclosure: {}", e)))?;
            self.enclosure = Some(url.to_string());
        }
        Ok(())
    }

    fn build(self) -> Option<FeedItem> {
        Some(FeedItem {
            title: self.title?,
            link: self.link.or(self.enclosure)?,
            published: self.published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example tracker</title>
    <link>https://tracker.example/</link>
    <item>
      <title>Show S01E01</title>
      <link>magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&amp;dn=Show</link>
      <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title><![CDATA[Show S01E02]]></title>
      <enclosure url="https://tracker.example/dl/0123456789abcdef0123456789abcdef01234567.torrent" type="application/x-bittorrent" />
    </item>
    <item>
      <link>https://tracker.example/untitled</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_skips_incomplete_ones() {
        let items = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "Show S01E01");
        assert_eq!(
            items[0].link,
            "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=Show"
        );
        assert_eq!(
            items[0].published.as_deref(),
            Some("Mon, 01 Jan 2024 10:00:00 +0000")
        );

        assert_eq!(items[1].title, "Show S01E02");
        assert!(items[1].link.ends_with("01234567.torrent"));
        assert_eq!(items[1].published, None);
    }

    #[test]
    fn malformed_xml_is_a_feed_error() {
        let result = parse_feed(b"<rss><channel><item><title>x</wrong></item>");
        assert!(matches!(result, Err(SeedwatchError::Feed(_))));
    }
}
