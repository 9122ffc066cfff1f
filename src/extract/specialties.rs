use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{dedupe_by, lines, Strategy};
use crate::browser::PageDriver;
use crate::error::ScrapeError;
use crate::normalize::normalize;

/// A service category offered by the booking widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Specialty {
    /// Label as displayed.
    #[serde(rename = "nombre")]
    pub label: String,
    /// Machine value exposed by the DOM, or the label when there is none.
    #[serde(rename = "valor")]
    pub value: String,
}

impl Specialty {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            value: label.clone(),
            label,
        }
    }
}

/// Candidate list items, most specific first.
pub const SPECIALTY_ITEM_SELECTORS: &[&str] = &[
    "[data-specialty]",
    ".specialty-item",
    ".especialidad-item",
    "[class*='especialidad'] li",
    "[class*='specialty'] li",
    "select[name*='especialidad'] option",
    "ul.list-group li",
    "[role='listbox'] [role='option']",
];

/// Phrases that belong to the widget chrome, never to a specialty.
const NAVIGATION_PHRASES: &[&str] = &[
    "volver",
    "atras",
    "back",
    "buscar",
    "search",
    "seleccione",
    "selecciona",
    "select",
    "siguiente",
    "anterior",
    "continuar",
    "cerrar",
    "inicio",
    "menu",
    "reservar",
    "reserva de hora",
    "agenda",
    "agendar",
    "especialidad",
    "especialidades",
    "por especialidad",
    "por profesional",
    "profesional",
    "profesionales",
    "iniciar sesion",
    "ayuda",
    "contacto",
    "cargando",
];

static VALUE_ATTRS: &[&str] = &["data-value", "value", "data-id", "data-specialty"];

static COMPILED_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    SPECIALTY_ITEM_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

pub(crate) fn is_navigation_noise(line: &str) -> bool {
    let norm = normalize(line);
    let chars = norm.chars().count();
    if !(3..=60).contains(&chars) {
        return true;
    }
    if norm.ends_with(':') || norm.chars().all(|c| c.is_ascii_digit() || c.is_whitespace() || c.is_ascii_punctuation()) {
        return true;
    }
    NAVIGATION_PHRASES
        .iter()
        .any(|p| norm == *p || norm.starts_with(&format!("{p} ")))
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_value(el: &ElementRef<'_>) -> Option<String> {
    VALUE_ATTRS
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn finish(items: Vec<Specialty>) -> Vec<Specialty> {
    dedupe_by(items, |s| normalize(&s.label))
}

/// Scans the candidate selectors in order; the first selector yielding any
/// usable item decides the list.
pub fn parse_specialty_html(html: &str) -> Vec<Specialty> {
    let document = Html::parse_document(html);
    for selector in COMPILED_SELECTORS.iter() {
        let items: Vec<Specialty> = document
            .select(selector)
            .filter_map(|el| {
                let label = element_text(&el);
                if is_navigation_noise(&label) {
                    return None;
                }
                let value = element_value(&el).unwrap_or_else(|| label.clone());
                Some(Specialty { label, value })
            })
            .collect();
        if !items.is_empty() {
            return finish(items);
        }
    }
    Vec::new()
}

/// Line-by-line fallback over the rendered body text.
pub fn parse_specialty_text(text: &str) -> Vec<Specialty> {
    finish(
        lines(text)
            .into_iter()
            .filter(|l| !is_navigation_noise(l))
            .map(Specialty::new)
            .collect(),
    )
}

pub struct SpecialtyListStrategy;

#[async_trait]
impl Strategy<Specialty> for SpecialtyListStrategy {
    fn name(&self) -> &'static str {
        "specialty-list"
    }

    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<Specialty>>, ScrapeError> {
        let html = page.html().await?;
        Ok(Some(parse_specialty_html(&html)))
    }
}

pub struct SpecialtyTextStrategy;

#[async_trait]
impl Strategy<Specialty> for SpecialtyTextStrategy {
    fn name(&self) -> &'static str {
        "specialty-text"
    }

    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<Specialty>>, ScrapeError> {
        let text = page.inner_text().await?;
        Ok(Some(parse_specialty_text(&text)))
    }
}

pub fn strategies() -> Vec<Box<dyn Strategy<Specialty>>> {
    vec![Box::new(SpecialtyListStrategy), Box::new(SpecialtyTextStrategy)]
}
