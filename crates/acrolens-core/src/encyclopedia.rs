//! Encyclopedia capability and the summary-versus-listing policy.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LookupError;

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
use regex::{Regex, escape};
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
use regex_lite::{Regex, escape};

/// Category carried by pages that list several unrelated meanings.
pub const DISAMBIGUATION_CATEGORY: &str = "Category:Disambiguation pages";

/// One section of a page's structured content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageSection {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<PageSection>,
}

/// A fetched encyclopedia page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    pub title: String,
    pub summary: String,
    pub categories: Vec<String>,
    pub content: Vec<PageSection>,
}

impl Page {
    pub fn is_disambiguation(&self) -> bool {
        self.categories.iter().any(|c| c == DISAMBIGUATION_CATEGORY)
    }

    /// Whether the summary mentions `term` as a whole word, ignoring case.
    pub fn summary_mentions(&self, term: &str) -> bool {
        let term = term.trim();
        if term.is_empty() {
            return false;
        }
        match Regex::new(&format!(r"(?i)\b{}\b", escape(term))) {
            Ok(re) => re.is_match(&self.summary),
            Err(_) => false,
        }
    }

    /// A page answers `term` directly when it is not a disambiguation page
    /// and its summary mentions the term.
    pub fn answers(&self, term: &str) -> bool {
        !self.is_disambiguation() && self.summary_mentions(term)
    }
}

/// What the encyclopedia panel shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EncyclopediaView {
    /// One summary section for a page that answers the query.
    Summary { title: String, summary: String },
    /// The structured content of a page that does not.
    Sections { title: String, sections: Vec<PageSection> },
}

impl EncyclopediaView {
    /// Apply the summary policy for `term` to a page.
    pub fn for_page(page: Page, term: &str) -> Self {
        if page.answers(term) {
            EncyclopediaView::Summary {
                title: page.title,
                summary: page.summary,
            }
        } else {
            EncyclopediaView::Sections {
                title: page.title,
                sections: page.content,
            }
        }
    }

    /// Sections as rendered, the summary being a single `Summary (<title>)` section.
    pub fn sections(&self) -> Vec<PageSection> {
        match self {
            EncyclopediaView::Summary { title, summary } => vec![PageSection {
                title: format!("Summary ({title})"),
                content: summary.clone(),
                items: Vec::new(),
            }],
            EncyclopediaView::Sections { sections, .. } => sections.clone(),
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, EncyclopediaView::Summary { .. })
    }
}

/// Encyclopedia lookup capability.
pub trait Encyclopedia: Clone + 'static {
    /// Best page for `query`, with summary, categories and content loaded.
    fn find(&self, query: &str) -> impl Future<Output = Result<Page, LookupError>>;
}

/// Resolve the panel content for `acronym`.
///
/// When an expansion of the acronym is known, its page is tried first; it is
/// only shown if it answers the acronym itself. Otherwise the acronym's own
/// page decides between a summary and its structured listing.
pub async fn resolve<E: Encyclopedia>(
    encyclopedia: &E,
    acronym: &str,
    expansion: Option<&str>,
) -> Result<EncyclopediaView, LookupError> {
    if let Some(expansion) = expansion.map(str::trim).filter(|e| !e.is_empty() && *e != acronym) {
        match encyclopedia.find(expansion).await {
            Ok(page) if page.answers(acronym) => {
                return Ok(EncyclopediaView::for_page(page, acronym));
            }
            Ok(page) => {
                tracing::trace!(title = %page.title, "expansion page does not answer the acronym");
            }
            Err(e) => tracing::debug!(error = %e, "expansion lookup failed, trying the acronym"),
        }
    }

    let page = encyclopedia.find(acronym).await?;
    Ok(EncyclopediaView::for_page(page, acronym))
}
