//! Response normalization
//!
//! Turns raw service payloads into typed records:
//! - entity-data XML (`Response` element with link, label, image and
//!   definition sections) → [`EntityRecord`]
//! - page-view JSON (`daily_views` map) → [`MonthlyViews`]
//!
//! Numeric and boolean attributes arrive as text and are coerced here. A
//! value that fails coercion is logged and left absent; it never fails
//! the record.

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Payload parsing failure
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Payload has no Response element")]
    MissingResponse,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Entity records
// ============================================================================

/// Entry of `in_links`, `out_links` or `parent_categories`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relatedness: Option<f64>,

    /// Remaining attributes (`title`, ...), verbatim
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

/// Entry of `labels`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(rename = "fromRedirect", default, skip_serializing_if = "Option::is_none")]
    pub from_redirect: Option<bool>,

    #[serde(rename = "fromTitle", default, skip_serializing_if = "Option::is_none")]
    pub from_title: Option<bool>,

    #[serde(rename = "isPrimary", default, skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurances: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proportion: Option<f64>,

    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

/// Normalized entity-data response
///
/// `Default` is the empty placeholder used when a lookup fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecord {
    pub id: Option<i64>,
    pub title: Option<String>,
    /// `error` attribute reported by the service for unknown titles
    pub error: Option<String>,
    pub definition: Option<String>,
    pub in_links: Vec<RelatedLink>,
    pub out_links: Vec<RelatedLink>,
    pub parent_categories: Vec<RelatedLink>,
    pub labels: Vec<Label>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    InLinks,
    OutLinks,
    ParentCategories,
    Labels,
    Definition,
    Other,
}

impl Section {
    fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"InLinks" => Section::InLinks,
            b"OutLinks" => Section::OutLinks,
            b"ParentCategories" => Section::ParentCategories,
            b"Labels" => Section::Labels,
            b"Definition" => Section::Definition,
            _ => Section::Other,
        }
    }
}

/// Incremental builder driven by XML events under `Response`
struct ResponseBuilder {
    record: EntityRecord,
    /// Depth below `Response` (1 = direct child)
    depth: usize,
    section: Section,
    /// Label whose text is being read
    open_label: Option<Label>,
    definition: String,
}

impl ResponseBuilder {
    fn new(start: &BytesStart<'_>) -> Result<Self, NormalizeError> {
        let mut record = EntityRecord::default();
        for (key, value) in read_attributes(start)? {
            match key.as_str() {
                "id" => record.id = coerce_int("id", &value),
                "title" => record.title = Some(value),
                "error" => record.error = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            record,
            depth: 0,
            section: Section::Other,
            open_label: None,
            definition: String::new(),
        })
    }

    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), NormalizeError> {
        let depth = self.depth + 1;
        let tag = e.local_name();

        if depth == 1 {
            if tag.as_ref() == b"Image" {
                if let Some((_, url)) = read_attributes(e)?.into_iter().find(|(k, _)| k == "url") {
                    self.record.images.push(url);
                }
            }
            self.section = Section::from_tag(tag.as_ref());
        } else if depth == 2 {
            let attributes = read_attributes(e)?;
            match self.section {
                Section::InLinks => self.record.in_links.push(related_link(attributes)),
                Section::OutLinks => self.record.out_links.push(related_link(attributes)),
                Section::ParentCategories => {
                    self.record.parent_categories.push(related_link(attributes))
                }
                Section::Labels => {
                    let label = label(attributes);
                    if empty {
                        self.record.labels.push(label);
                    } else {
                        self.open_label = Some(label);
                    }
                }
                Section::Definition | Section::Other => {}
            }
        }

        if !empty {
            self.depth = depth;
        } else if depth == 1 {
            self.section = Section::Other;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        // Inline markup inside Definition nests below depth 1
        if self.depth >= 1 && self.section == Section::Definition {
            self.definition.push_str(text);
        } else if self.depth == 2 {
            if let Some(label) = self.open_label.as_mut() {
                label.title.get_or_insert_with(String::new).push_str(text);
            }
        }
    }

    /// Returns true when the `Response` element itself closed
    fn end(&mut self) -> bool {
        if self.depth == 0 {
            return true;
        }
        if self.depth == 2 {
            if let Some(mut label) = self.open_label.take() {
                label.title = label
                    .title
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());
                self.record.labels.push(label);
            }
        }
        if self.depth == 1 {
            self.section = Section::Other;
        }
        self.depth -= 1;
        false
    }

    fn finish(mut self) -> EntityRecord {
        let definition = self.definition.trim();
        if !definition.is_empty() {
            self.record.definition = Some(definition.to_string());
        }
        self.record
    }
}

/// Parse an entity-data payload.
///
/// The first `Response` element at any depth is used. Unescaped markup
/// inside `Definition` is flattened to its text content with the
/// original spacing.
pub fn parse_entity_response(payload: &str) -> Result<EntityRecord, NormalizeError> {
    let mut reader = Reader::from_str(payload);

    let mut builder: Option<ResponseBuilder> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match builder.as_mut() {
                Some(b) => b.start(&e, false)?,
                None if e.local_name().as_ref() == b"Response" => {
                    builder = Some(ResponseBuilder::new(&e)?);
                }
                None => {}
            },
            Event::Empty(e) => match builder.as_mut() {
                Some(b) => b.start(&e, true)?,
                None if e.local_name().as_ref() == b"Response" => {
                    return Ok(ResponseBuilder::new(&e)?.finish());
                }
                None => {}
            },
            Event::Text(t) => {
                if let Some(b) = builder.as_mut() {
                    b.text(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(b) = builder.as_mut() {
                    b.text(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(b) = builder.as_mut() {
                    if b.end() {
                        break;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder
        .map(ResponseBuilder::finish)
        .ok_or(NormalizeError::MissingResponse)
}

fn read_attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, NormalizeError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn related_link(attributes: Vec<(String, String)>) -> RelatedLink {
    let mut link = RelatedLink::default();
    for (key, value) in attributes {
        match key.as_str() {
            "id" => link.id = coerce_int("id", &value),
            "relatedness" => link.relatedness = coerce_float("relatedness", &value),
            _ => {
                link.attributes.insert(key, value);
            }
        }
    }
    link
}

fn label(attributes: Vec<(String, String)>) -> Label {
    let mut label = Label::default();
    for (key, value) in attributes {
        match key.as_str() {
            "fromRedirect" => label.from_redirect = coerce_bool("fromRedirect", &value),
            "fromTitle" => label.from_title = coerce_bool("fromTitle", &value),
            "isPrimary" => label.is_primary = coerce_bool("isPrimary", &value),
            "occurances" => label.occurances = coerce_int("occurances", &value),
            "proportion" => label.proportion = coerce_float("proportion", &value),
            _ => {
                label.attributes.insert(key, value);
            }
        }
    }
    label
}

// ============================================================================
// Coercion
// ============================================================================

fn coerce_int(attribute: &str, value: &str) -> Option<i64> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(attribute, value, "Attribute is not an integer");
            None
        }
    }
}

fn coerce_float(attribute: &str, value: &str) -> Option<f64> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(attribute, value, "Attribute is not a number");
            None
        }
    }
}

fn coerce_bool(attribute: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => {
            tracing::warn!(attribute, value, "Attribute is not a boolean");
            None
        }
    }
}

// ============================================================================
// Page views
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawMonthlyViews {
    #[serde(default)]
    daily_views: HashMap<String, serde_json::Value>,
}

/// Daily page views for one (month, title)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyViews {
    pub days: HashMap<NaiveDate, u64>,
}

impl MonthlyViews {
    /// Views on `date`; days the service did not report count as 0
    pub fn views_on(&self, date: NaiveDate) -> u64 {
        self.days.get(&date).copied().unwrap_or(0)
    }
}

/// Parse a page-view payload (`{"daily_views": {"YYYY-MM-DD": n}}`).
///
/// Entries with unparseable dates or non-integer counts are skipped; the
/// service pads months with invalid dates such as `2013-02-30`.
pub fn parse_monthly_views(payload: &str) -> Result<MonthlyViews, NormalizeError> {
    let raw: RawMonthlyViews = serde_json::from_str(payload)?;

    let days = raw
        .daily_views
        .into_iter()
        .filter_map(|(date, count)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
            let count = count.as_u64()?;
            Some((date, count))
        })
        .collect();

    Ok(MonthlyViews { days })
}
