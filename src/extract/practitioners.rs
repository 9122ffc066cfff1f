use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{dedupe_by, lines, Strategy};
use crate::browser::PageDriver;
use crate::error::ScrapeError;
use crate::normalize::normalize;

/// A professional bookable within one specialty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Practitioner {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "especialidad")]
    pub specialty: String,
    #[serde(rename = "sucursal", skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    /// Best-effort "next available" hint as rendered.
    #[serde(rename = "proxima_hora", skip_serializing_if = "Option::is_none", default)]
    pub next_slot: Option<String>,
}

/// Cards or list rows holding one practitioner, most specific first.
pub const PRACTITIONER_ITEM_SELECTORS: &[&str] = &[
    "[data-professional]",
    ".professional-card",
    ".profesional-card",
    "[class*='profesional']",
    "[class*='professional']",
    "[class*='doctor']",
    ".card",
];

const NAME_SELECTOR: &str = "h2, h3, h4, h5, strong, .name, .nombre, [class*='name'], [class*='nombre']";

const SPECIALTY_LABELS: &[&str] = &["especialidad", "specialty"];
const BRANCH_LABELS: &[&str] = &["sucursal", "sede", "centro medico", "lugar de atencion", "branch"];
const NEXT_SLOT_LABELS: &[&str] = &[
    "proxima hora disponible",
    "proxima hora",
    "proxima disponibilidad",
    "primera hora disponible",
    "disponible desde",
    "next available",
];

static CARD_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    PRACTITIONER_ITEM_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static NAME: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse(NAME_SELECTOR).ok());

/// Splits `"Label: value"` when the normalized line starts with one of
/// `labels` as a whole word. `"Label value"` without a colon is accepted too.
fn labelled<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let norm = normalize(line);
    let label = labels.iter().find(|l| {
        norm.starts_with(*l) && matches!(norm[l.len()..].chars().next(), None | Some(' ') | Some(':'))
    })?;

    if let Some((head, tail)) = line.split_once(':') {
        if normalize(head) == *label {
            return Some(tail.trim());
        }
    }
    Some(skip_words(line, label.split_whitespace().count()).trim())
}

fn skip_words(line: &str, count: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}

fn is_label_line(line: &str) -> bool {
    labelled(line, SPECIALTY_LABELS).is_some()
        || labelled(line, BRANCH_LABELS).is_some()
        || labelled(line, NEXT_SLOT_LABELS).is_some()
}

fn plausible_name(line: &str) -> bool {
    let norm = normalize(line);
    let len = norm.chars().count();
    (3..=80).contains(&len)
        && norm.chars().any(char::is_alphabetic)
        && !norm.ends_with(':')
        && !is_label_line(line)
}

fn finish(items: Vec<Practitioner>) -> Vec<Practitioner> {
    dedupe_by(items, |p| normalize(&p.name))
}

/// Text-adjacency parse: a `Especialidad: X` line names the practitioner on
/// the line above; the next few lines may hold branch and next-slot hints.
pub fn parse_practitioner_lines(lines: &[&str]) -> Vec<Practitioner> {
    let mut found = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(specialty) = labelled(line, SPECIALTY_LABELS) else {
            continue;
        };
        if i == 0 || !plausible_name(lines[i - 1]) {
            continue;
        }

        let mut practitioner = Practitioner {
            name: lines[i - 1].trim().to_string(),
            specialty: specialty.to_string(),
            branch: None,
            next_slot: None,
        };

        for follow in lines.iter().skip(i + 1).take(3) {
            if labelled(follow, SPECIALTY_LABELS).is_some() {
                break;
            }
            if let Some(branch) = labelled(follow, BRANCH_LABELS).filter(|b| !b.is_empty()) {
                practitioner.branch.get_or_insert_with(|| branch.to_string());
            } else if let Some(hint) = labelled(follow, NEXT_SLOT_LABELS).filter(|h| !h.is_empty()) {
                practitioner.next_slot.get_or_insert_with(|| hint.to_string());
            }
        }

        found.push(practitioner);
    }

    finish(found)
}

fn card_lines(el: &ElementRef<'_>) -> Vec<String> {
    el.text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

fn card_to_practitioner(el: &ElementRef<'_>, default_specialty: &str) -> Option<Practitioner> {
    let texts = card_lines(el);
    let name = NAME
        .as_ref()
        .and_then(|sel| el.select(sel).next())
        .map(|n| card_lines(&n).join(" "))
        .filter(|n| plausible_name(n))
        .or_else(|| texts.iter().find(|t| plausible_name(t)).cloned())?;

    let mut practitioner = Practitioner {
        name,
        specialty: default_specialty.to_string(),
        branch: None,
        next_slot: None,
    };
    for text in &texts {
        if let Some(specialty) = labelled(text, SPECIALTY_LABELS).filter(|s| !s.is_empty()) {
            practitioner.specialty = specialty.to_string();
        } else if let Some(branch) = labelled(text, BRANCH_LABELS).filter(|b| !b.is_empty()) {
            practitioner.branch.get_or_insert_with(|| branch.to_string());
        } else if let Some(hint) = labelled(text, NEXT_SLOT_LABELS).filter(|h| !h.is_empty()) {
            practitioner.next_slot.get_or_insert_with(|| hint.to_string());
        }
    }
    Some(practitioner)
}

/// Card-element fallback; `default_specialty` fills cards without a label.
pub fn parse_practitioner_cards(html: &str, default_specialty: &str) -> Vec<Practitioner> {
    let document = Html::parse_document(html);
    for selector in CARD_SELECTORS.iter() {
        let items: Vec<Practitioner> = document
            .select(selector)
            .filter_map(|card| card_to_practitioner(&card, default_specialty))
            .collect();
        if !items.is_empty() {
            return finish(items);
        }
    }
    Vec::new()
}

pub struct LabelAdjacencyStrategy;

#[async_trait]
impl Strategy<Practitioner> for LabelAdjacencyStrategy {
    fn name(&self) -> &'static str {
        "practitioner-label-adjacency"
    }

    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<Practitioner>>, ScrapeError> {
        let text = page.inner_text().await?;
        Ok(Some(parse_practitioner_lines(&lines(&text))))
    }
}

pub struct CardStrategy {
    pub specialty: String,
}

#[async_trait]
impl Strategy<Practitioner> for CardStrategy {
    fn name(&self) -> &'static str {
        "practitioner-cards"
    }

    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<Practitioner>>, ScrapeError> {
        let html = page.html().await?;
        Ok(Some(parse_practitioner_cards(&html, &self.specialty)))
    }
}

pub fn strategies(specialty: &str) -> Vec<Box<dyn Strategy<Practitioner>>> {
    vec![
        Box::new(LabelAdjacencyStrategy),
        Box::new(CardStrategy {
            specialty: specialty.to_string(),
        }),
    ]
}
