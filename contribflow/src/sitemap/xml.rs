//! Sitemap protocol documents.

use crate::config::SITEMAP_URL_LIMIT;
use crate::errors::SitemapError;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesDecl, BytesEnd, BytesRef, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// One `<url>` or `<sitemap>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapUrl {
    /// Absolute location.
    pub loc: String,
    /// W3C datetime of the last modification.
    pub lastmod: Option<String>,
}

impl SitemapUrl {
    /// Creates an entry without a modification time.
    #[must_use]
    pub fn new(loc: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            lastmod: None,
        }
    }

    /// Sets the modification time.
    #[must_use]
    pub fn with_lastmod(mut self, lastmod: impl Into<String>) -> Self {
        self.lastmod = Some(lastmod.into());
        self
    }
}

fn xml_err(e: impl std::fmt::Display) -> SitemapError {
    SitemapError::Xml(e.to_string())
}

fn render(root: &str, item: &str, entries: &[SitemapUrl]) -> Result<String, SitemapError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new(root).with_attributes([("xmlns", SITEMAP_NS)])))
        .map_err(xml_err)?;

    for entry in entries {
        writer
            .write_event(Event::Start(BytesStart::new(item)))
            .map_err(xml_err)?;
        write_leaf(&mut writer, "loc", &entry.loc)?;
        if let Some(lastmod) = &entry.lastmod {
            write_leaf(&mut writer, "lastmod", lastmod)?;
        }
        writer.write_event(Event::End(BytesEnd::new(item))).map_err(xml_err)?;
    }

    writer.write_event(Event::End(BytesEnd::new(root))).map_err(xml_err)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn write_leaf(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), SitemapError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_err)
}

/// Renders a `<urlset>` page.
///
/// # Errors
///
/// Returns [`SitemapError::PageTooLarge`] above the protocol limit of
/// 50,000 URLs, or an XML error.
pub fn render_urlset(file: &str, urls: &[SitemapUrl]) -> Result<String, SitemapError> {
    if urls.len() > SITEMAP_URL_LIMIT {
        return Err(SitemapError::PageTooLarge {
            file: file.to_string(),
            count: urls.len(),
            max: SITEMAP_URL_LIMIT,
        });
    }
    render("urlset", "url", urls)
}

/// Renders a `<sitemapindex>` document.
///
/// # Errors
///
/// Returns an error if the XML cannot be written.
pub fn render_index(sitemaps: &[SitemapUrl]) -> Result<String, SitemapError> {
    render("sitemapindex", "sitemap", sitemaps)
}

/// Extracts every `<loc>` value from a page or index document.
///
/// # Errors
///
/// Returns an error if the document is not well-formed.
pub fn parse_locs(xml: &str) -> Result<Vec<String>, SitemapError> {
    let mut reader = Reader::from_str(xml);

    let mut locs: Vec<String> = Vec::new();
    let mut in_loc = false;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.local_name().as_ref() == b"loc" => {
                in_loc = true;
                locs.push(String::new());
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Event::Text(e) if in_loc => {
                if let Some(last) = locs.last_mut() {
                    last.push_str(&e.decode().map_err(xml_err)?);
                }
            }
            // Entities such as `&amp;` arrive as separate events.
            Event::GeneralRef(e) if in_loc => {
                let resolved = resolve_reference(&e)?;
                if let Some(last) = locs.last_mut() {
                    last.push_str(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(locs.into_iter().map(|loc| loc.trim().to_string()).collect())
}

fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, SitemapError> {
    if let Some(ch) = reference.resolve_char_ref().map_err(xml_err)? {
        return Ok(ch.to_string());
    }
    let name = reference.decode().map_err(xml_err)?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| SitemapError::Xml(format!("Unknown entity '&{name};'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_urlset_document() {
        let xml = render_urlset(
            "repositories-1.xml",
            &[
                SitemapUrl::new("https://example.com/acme/widgets").with_lastmod("2024-01-01T00:00:00Z"),
                SitemapUrl::new("https://example.com/acme/gadgets"),
            ],
        )
        .unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">"));
        assert!(xml.contains("<lastmod>2024-01-01T00:00:00Z</lastmod>"));
        assert_eq!(xml.matches("<url>").count(), 2);
        assert_eq!(
            parse_locs(&xml).unwrap(),
            vec!["https://example.com/acme/widgets", "https://example.com/acme/gadgets"]
        );
    }

    #[test]
    fn test_escaped_characters_survive_parsing() {
        let loc = "https://example.com/search?q=a&page=2&sort=<new>";
        let xml = render_urlset("repositories-1.xml", &[SitemapUrl::new(loc)]).unwrap();

        assert!(xml.contains("&amp;page=2"));
        assert_eq!(parse_locs(&xml).unwrap(), vec![loc]);
        assert_eq!(
            parse_locs("<urlset><url><loc>https://e.com/a?x=1&#38;y=2</loc></url></urlset>").unwrap(),
            vec!["https://e.com/a?x=1&y=2"]
        );
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        let err = parse_locs("<urlset><url><loc>https://e.com/&nbsp;</loc></url></urlset>").unwrap_err();
        assert!(matches!(err, SitemapError::Xml(_)));
    }

    #[test]
    fn test_index_document() {
        let xml = render_index(&[SitemapUrl::new("https://example.com/sitemaps/repositories-1.xml")]).unwrap();
        assert!(xml.contains("<sitemapindex"));
        assert!(xml.contains("<sitemap>"));
        assert_eq!(parse_locs(&xml).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_oversized_page() {
        let urls = vec![SitemapUrl::new("https://example.com/x"); SITEMAP_URL_LIMIT + 1];
        let err = render_urlset("repositories-1.xml", &urls).unwrap_err();
        assert!(matches!(err, SitemapError::PageTooLarge { count, .. } if count == SITEMAP_URL_LIMIT + 1));
    }
}
