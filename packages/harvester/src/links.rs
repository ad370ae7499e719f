//! Link extraction from rendered HTML.
//!
//! Each hierarchy level is described by CSS selectors (see
//! [`crate::config::LevelSignatures`]); this module applies them and resolves
//! the resulting `href`s against the page they came from.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::PollingUnitSignature;
use crate::error::{HarvesterError, Result};

/// An anchor pulled from a rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Visible text, whitespace-collapsed.
    pub text: String,
    /// Absolute target URL.
    pub href: String,
}

/// Result of pairing polling-unit names with their links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingUnitLinks {
    Paired(Vec<Link>),
    /// Name and link lists diverge; pairing by position would misalign them.
    Mismatched { names: usize, links: usize },
}

/// Parse a CSS selector, mapping failures into `HarvesterError`.
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| HarvesterError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Whether `html` contains at least one element matching `selector`.
pub fn contains_selector(html: &str, selector: &str) -> Result<bool> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// Extract every anchor matching `selector`, in document order.
///
/// Relative hrefs are resolved against `base_url`; anchors without a usable
/// href are skipped.
pub fn extract_links(html: &str, base_url: &str, selector: &str) -> Result<Vec<Link>> {
    let base = Url::parse(base_url)?;
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .filter_map(|element| to_link(element, &base, element_text(element)))
        .collect())
}

/// Extract polling units from a ward page.
///
/// With a container selector every container contributes one link, named by
/// the first `name_selector` match inside it (falling back to the anchor
/// text). Without one, names and links are paired by position, and only
/// when both lists are the same length.
pub fn extract_polling_units(
    html: &str,
    base_url: &str,
    signature: &PollingUnitSignature,
) -> Result<PollingUnitLinks> {
    let base = Url::parse(base_url)?;
    let link_selector = parse_selector(&signature.link_selector)?;
    let name_selector = parse_selector(&signature.name_selector)?;
    let document = Html::parse_document(html);

    if let Some(container) = &signature.container_selector {
        let container_selector = parse_selector(container)?;
        let links = document
            .select(&container_selector)
            .filter_map(|item| {
                let anchor = item.select(&link_selector).next()?;
                let name = item
                    .select(&name_selector)
                    .next()
                    .map(element_text)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| element_text(anchor));
                to_link(anchor, &base, name)
            })
            .collect();
        return Ok(PollingUnitLinks::Paired(links));
    }

    let anchors: Vec<ElementRef<'_>> = document.select(&link_selector).collect();
    let names: Vec<String> = document.select(&name_selector).map(element_text).collect();

    if anchors.len() != names.len() {
        return Ok(PollingUnitLinks::Mismatched {
            names: names.len(),
            links: anchors.len(),
        });
    }

    let links = anchors
        .into_iter()
        .zip(names)
        .filter_map(|(anchor, name)| to_link(anchor, &base, name))
        .collect();
    Ok(PollingUnitLinks::Paired(links))
}

fn to_link(element: ElementRef<'_>, base: &Url, text: String) -> Option<Link> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let resolved = base.join(href).ok()?;
    Some(Link {
        text,
        href: resolved.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
