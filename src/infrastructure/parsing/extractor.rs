//! Page extractor: runs compiled probe tables against a loaded document

use std::collections::HashMap;

use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::config::{FieldKind, PageCatalog, PageSpec};
use super::error::ExtractionError;
use super::probe::{CompiledProbe, coerce_number};
use crate::domain::{Account, FieldMap, FieldValue, Snapshot, SnapshotKind};

#[derive(Debug)]
struct CompiledField {
    name: String,
    kind: FieldKind,
    probes: Vec<CompiledProbe>,
}

/// Compiled probe tables for every page type in a [`PageCatalog`]
#[derive(Debug)]
pub struct PageExtractor {
    catalog: PageCatalog,
    fields: HashMap<SnapshotKind, Vec<CompiledField>>,
    login_markers: Vec<Selector>,
}

impl PageExtractor {
    /// Compiles every probe up front.
    ///
    /// A candidate that does not compile is logged and dropped; a field left
    /// with no candidate at all is an error.
    pub fn new(catalog: PageCatalog) -> Result<Self, ExtractionError> {
        let mut fields = HashMap::new();
        for page in &catalog.pages {
            fields.insert(page.kind, Self::compile_page(page)?);
        }

        let login_markers = catalog
            .login_markers
            .iter()
            .filter_map(|marker| match Selector::parse(marker) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    warn!("Failed to compile login marker '{}': {}", marker, e);
                    None
                }
            })
            .collect();

        Ok(Self { catalog, fields, login_markers })
    }

    pub fn with_defaults() -> Result<Self, ExtractionError> {
        Self::new(PageCatalog::default())
    }

    fn compile_page(page: &PageSpec) -> Result<Vec<CompiledField>, ExtractionError> {
        page.fields
            .iter()
            .map(|field| {
                let probes: Vec<CompiledProbe> = field
                    .probes
                    .iter()
                    .filter_map(|probe| match CompiledProbe::compile(probe) {
                        Ok(compiled) => Some(compiled),
                        Err(reason) => {
                            let err = ExtractionError::InvalidProbe {
                                field: field.name.clone(),
                                probe: probe.describe(),
                                reason,
                            };
                            warn!("{}", err);
                            None
                        }
                    })
                    .collect();

                if probes.is_empty() {
                    return Err(ExtractionError::NoUsableProbe { kind: page.kind, field: field.name.clone() });
                }
                Ok(CompiledField { name: field.name.clone(), kind: field.kind, probes })
            })
            .collect()
    }

    pub const fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    pub fn spec(&self, kind: SnapshotKind) -> Result<&PageSpec, ExtractionError> {
        self.catalog.spec(kind).ok_or(ExtractionError::UnknownPage(kind))
    }

    /// Page kind for a URL the companion is looking at; `None` for anything else
    pub fn classify_url(&self, page_url: &str) -> Option<SnapshotKind> {
        let parsed = url::Url::parse(page_url).ok()?;
        let location = format!("{}{}", parsed.host_str()?, parsed.path());

        self.catalog
            .pages
            .iter()
            .find(|page| page.url_patterns.iter().any(|pattern| location.starts_with(pattern.as_str())))
            .map(|page| page.kind)
    }

    /// True when the document carries any login-form marker
    pub fn looks_like_login_wall(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        self.login_markers.iter().any(|marker| document.select(marker).next().is_some())
    }

    /// Reads every field of `kind` from `html`.
    ///
    /// Numeric fields take the first candidate whose text coerces to a number,
    /// defaulting to 0. Text fields take the first non-empty candidate,
    /// defaulting to "".
    pub fn extract_fields(&self, kind: SnapshotKind, html: &str) -> FieldMap {
        let Some(fields) = self.fields.get(&kind) else {
            warn!("No probe table for page kind {}", kind);
            return FieldMap::new();
        };

        let document = Html::parse_document(html);
        let mut values = FieldMap::new();

        for field in fields {
            let value = match field.kind {
                FieldKind::Number => FieldValue::Number(
                    field
                        .probes
                        .iter()
                        .find_map(|probe| probe.resolve(&document).and_then(|text| coerce_number(&text)))
                        .unwrap_or(0.0),
                ),
                FieldKind::Text => FieldValue::Text(
                    field.probes.iter().find_map(|probe| probe.resolve(&document)).unwrap_or_default(),
                ),
            };
            debug!(page = %kind, field = %field.name, ?value, "field extracted");
            values.insert(field.name.clone(), value);
        }

        values
    }

    /// [`Self::extract_fields`] wrapped into an immutable snapshot
    pub fn extract(&self, account: &Account, kind: SnapshotKind, html: &str, source_url: &str) -> Snapshot {
        Snapshot::new(account, kind, self.extract_fields(kind, html), source_url)
    }
}
