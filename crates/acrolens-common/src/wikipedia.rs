//! Wikipedia client over the MediaWiki action API.
//!
//! `find` searches for the best title, then loads the page with redirects
//! followed: its plain-text extract (split into the lead summary and nested
//! sections) and its categories.

use std::future::Future;

use acrolens_core::{Encyclopedia, LookupError, Page, PageSection};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::error::{NetError, check_status, error_message};

pub const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";

const SERVICE: &str = "wikipedia";

#[derive(Clone)]
pub struct WikipediaClient {
    client: reqwest::Client,
    api_url: SmolStr,
}

impl Default for WikipediaClient {
    fn default() -> Self {
        Self::new(WIKIPEDIA_API_URL)
    }
}

impl WikipediaClient {
    pub fn new(api_url: impl Into<SmolStr>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn get<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, NetError> {
        let response = self
            .client
            .get(self.api_url.as_str())
            .query(&[("format", "json"), ("formatversion", "2"), ("origin", "*")])
            .query(params)
            .send()
            .await?;
        let body = check_status(SERVICE, response).await?.text().await?;
        if let Some(message) = error_message(&body) {
            return Err(NetError::remote(SERVICE, message));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Title of the best search hit for `query`.
    pub async fn search_title(&self, query: &str) -> Result<Option<String>, NetError> {
        let response: SearchResponse = self
            .get(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "1"),
                ("srprop", ""),
            ])
            .await?;
        Ok(response.first_title())
    }

    /// The page named `title`, after redirects.
    pub async fn page(&self, title: &str) -> Result<Option<Page>, NetError> {
        let response: PageResponse = self
            .get(&[
                ("action", "query"),
                ("prop", "extracts|categories"),
                ("titles", title),
                ("redirects", "1"),
                ("explaintext", "1"),
                ("exsectionformat", "wiki"),
                ("cllimit", "max"),
            ])
            .await?;
        Ok(response.into_page())
    }

    async fn find_page(&self, query: &str) -> Result<Page, LookupError> {
        let title = self
            .search_title(query)
            .await
            .map_err(NetError::into_encyclopedia_error)?
            .ok_or_else(|| LookupError::NotFound(query.into()))?;
        trace!(query, title = %title, "search hit");
        let page = self
            .page(&title)
            .await
            .map_err(NetError::into_encyclopedia_error)?
            .ok_or_else(|| LookupError::NotFound(query.into()))?;
        debug!(
            query,
            title = %page.title,
            sections = page.content.len(),
            categories = page.categories.len(),
            "loaded encyclopedia page"
        );
        Ok(page)
    }
}

impl Encyclopedia for WikipediaClient {
    fn find(&self, query: &str) -> impl Future<Output = Result<Page, LookupError>> {
        let client = self.clone();
        let query = query.trim().to_string();
        async move { client.find_page(&query).await }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

impl SearchResponse {
    fn first_title(self) -> Option<String> {
        self.query?.search.into_iter().next().map(|hit| hit.title)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageResponse {
    #[serde(default)]
    query: Option<PageQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    #[serde(default)]
    pages: Vec<RawPage>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    title: String,
}

impl PageResponse {
    fn into_page(self) -> Option<Page> {
        let raw = self
            .query?
            .pages
            .into_iter()
            .find(|page| !page.missing && !page.invalid)?;
        let (summary, content) = split_extract(&raw.extract);
        Some(Page {
            title: raw.title,
            summary,
            categories: raw.categories.into_iter().map(|c| c.title).collect(),
            content,
        })
    }
}

/// `== Title ==` style heading: its level (2 for `==`) and title.
fn heading(line: &str) -> Option<(usize, &str)> {
    let line = line.trim();
    let level = line.chars().take_while(|c| *c == '=').count();
    if level < 2 || line.len() < level * 2 + 1 || !line.ends_with(&"=".repeat(level)) {
        return None;
    }
    let title = line[level..line.len() - level].trim();
    (!title.is_empty() && !title.starts_with('=') && !title.ends_with('='))
        .then_some((level, title))
}

/// Split a plain-text extract into the lead and a tree of sections nested
/// by heading level. Empty sections without subsections are dropped.
pub fn split_extract(extract: &str) -> (String, Vec<PageSection>) {
    let mut lead = String::new();
    let mut flat: Vec<(usize, PageSection)> = Vec::new();
    for line in extract.lines() {
        if let Some((level, title)) = heading(line) {
            flat.push((
                level,
                PageSection {
                    title: title.to_string(),
                    ..Default::default()
                },
            ));
            continue;
        }
        let target = match flat.last_mut() {
            Some((_, section)) => &mut section.content,
            None => &mut lead,
        };
        if !target.is_empty() || !line.trim().is_empty() {
            target.push_str(line);
            target.push('\n');
        }
    }

    let mut sections = Vec::new();
    for (level, mut section) in flat {
        section.content = section.content.trim().to_string();
        insert_section(&mut sections, level.saturating_sub(2), section);
    }
    prune(&mut sections);
    (lead.trim().to_string(), sections)
}

fn insert_section(sections: &mut Vec<PageSection>, depth: usize, section: PageSection) {
    if depth > 0 {
        if let Some(parent) = sections.last_mut() {
            return insert_section(&mut parent.items, depth - 1, section);
        }
    }
    sections.push(section);
}

fn prune(sections: &mut Vec<PageSection>) {
    for section in sections.iter_mut() {
        prune(&mut section.items);
    }
    sections.retain(|s| !s.content.is_empty() || !s.items.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outline(sections: &[PageSection], depth: usize, out: &mut String) {
        for section in sections {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&section.title);
            if !section.content.is_empty() {
                out.push_str(": ");
                out.push_str(&section.content.replace('\n', " / "));
            }
            out.push('\n');
            outline(&section.items, depth + 1, out);
        }
    }

    #[test]
    fn test_heading_levels() {
        assert_eq!(heading("== History =="), Some((2, "History")));
        assert_eq!(heading("=== Early work ==="), Some((3, "Early work")));
        assert_eq!(heading("a == b =="), None);
        assert_eq!(heading("= Title ="), None);
        assert_eq!(heading("===="), None);
    }

    #[test]
    fn test_split_extract_nests_sections() {
        let extract = "\
ACE may refer to:

== Computing ==
Access control entry
Advanced Computing Environment

== Science ==

=== Medicine ===
Angiotensin-converting enzyme
==== Drugs ====
ACE inhibitor
=== Physics ===

== See also ==
";
        let (lead, sections) = split_extract(extract);
        assert_eq!(lead, "ACE may refer to:");
        let mut out = String::new();
        outline(&sections, 0, &mut out);
        insta::assert_snapshot!(out, @r"
        Computing: Access control entry / Advanced Computing Environment
        Science
          Medicine: Angiotensin-converting enzyme
            Drugs: ACE inhibitor
        ");
    }

    #[test]
    fn test_page_decode() {
        let response: PageResponse = serde_json::from_value(json!({
            "batchcomplete": true,
            "query": {
                "redirects": [{ "from": "REST", "to": "REST (computing)" }],
                "pages": [{
                    "pageid": 1,
                    "ns": 0,
                    "title": "REST (computing)",
                    "extract": "REST is an architectural style.\n\n== History ==\nDefined in 2000.",
                    "categories": [
                        { "ns": 14, "title": "Category:Software architecture" }
                    ]
                }]
            }
        }))
        .unwrap();
        let page = response.into_page().unwrap();
        assert_eq!(page.title, "REST (computing)");
        assert_eq!(page.summary, "REST is an architectural style.");
        assert_eq!(page.categories, ["Category:Software architecture"]);
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].content, "Defined in 2000.");
        assert!(page.answers("REST"));
    }

    #[test]
    fn test_missing_page_and_empty_search() {
        let missing: PageResponse = serde_json::from_value(json!({
            "query": { "pages": [{ "ns": 0, "title": "Qqqx", "missing": true }] }
        }))
        .unwrap();
        assert_eq!(missing.into_page(), None);

        let empty: SearchResponse =
            serde_json::from_value(json!({ "query": { "searchinfo": {}, "search": [] } })).unwrap();
        assert_eq!(empty.first_title(), None);

        let hit: SearchResponse = serde_json::from_value(json!({
            "query": { "search": [{ "ns": 0, "title": "Frequently asked questions" }] }
        }))
        .unwrap();
        assert_eq!(hit.first_title().as_deref(), Some("Frequently asked questions"));
    }
}
