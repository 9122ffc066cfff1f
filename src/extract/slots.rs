use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::{dedupe_by, Strategy};
use crate::browser::{CapturedResponse, PageDriver, PageEvent, PageListener};
use crate::error::ScrapeError;
use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SlotState {
    #[serde(rename = "DISPONIBLE")]
    Available,
    #[serde(rename = "OCUPADO")]
    Taken,
    #[serde(rename = "DESCONOCIDO")]
    Unknown,
}

impl SlotState {
    /// Anything without an explicit taken marker is offered to callers.
    pub fn is_bookable(self) -> bool {
        self != SlotState::Taken
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeSlot {
    /// Zero-padded `HH:MM`.
    #[serde(rename = "hora")]
    pub time: String,
    #[serde(rename = "estado")]
    pub state: SlotState,
}

static CLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").unwrap());

const TAKEN_WORDS: &[&str] = &[
    "no disponible",
    "ocupado",
    "ocupada",
    "reservado",
    "reservada",
    "tomado",
    "tomada",
    "agotado",
    "bloqueado",
    "unavailable",
    "not available",
    "taken",
    "booked",
];
const AVAILABLE_WORDS: &[&str] = &["disponible", "libre", "available", "free"];
/// Suffixes that are part of the time, not an availability marker.
const TIME_SUFFIXES: &[&str] = &["hrs", "hr", "h", "am", "pm", "horas"];

const TIME_KEYS: &[&str] = &[
    "hora",
    "horainicio",
    "hora_inicio",
    "time",
    "start",
    "starttime",
    "start_time",
    "inicio",
    "hour",
];
const AVAILABILITY_FLAGS: &[&str] = &["disponible", "available", "isavailable", "is_available", "libre"];
const TAKEN_FLAGS: &[&str] = &["ocupado", "reservado", "taken", "booked", "isbooked", "is_booked"];
const STATE_KEYS: &[&str] = &["estado", "status", "state"];
/// URL fragments that mark a background response as slot data.
const SLOT_URL_HINTS: &[&str] = &["hora", "horario", "slot", "agenda", "disponib", "availab", "calendar", "turno", "cupo"];

/// Finds `H:MM`/`HH:MM` clock times not embedded in longer digit runs.
fn clock_matches(text: &str) -> Vec<(usize, usize, String)> {
    CLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let before = text[..whole.start()].chars().next_back();
            let after = text[whole.end()..].chars().next();
            if before.is_some_and(|c| c.is_ascii_digit()) || after.is_some_and(|c| c.is_ascii_digit()) {
                return None;
            }
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps[2].parse().ok()?;
            (hour <= 23 && minute <= 59).then(|| (whole.start(), whole.end(), format!("{hour:02}:{minute:02}")))
        })
        .collect()
}

/// Classifies the text following a clock time.
pub fn classify(marker: &str) -> SlotState {
    let norm = normalize(marker);
    if TAKEN_WORDS.iter().any(|w| norm.contains(w)) {
        return SlotState::Taken;
    }
    if AVAILABLE_WORDS.iter().any(|w| norm.contains(w)) {
        return SlotState::Available;
    }
    let meaningful = norm
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .any(|w| !TIME_SUFFIXES.contains(&w));
    if meaningful {
        SlotState::Unknown
    } else {
        SlotState::Available
    }
}

fn finish(slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    dedupe_by(slots, |s| s.time.clone())
}

/// Scans each rendered line for clock times; the text up to the next time on
/// the same line decides the availability.
pub fn parse_slot_text(text: &str) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    for line in text.lines() {
        let matches = clock_matches(line);
        for (i, (_, end, time)) in matches.iter().enumerate() {
            let until = matches.get(i + 1).map_or(line.len(), |next| next.0);
            slots.push(TimeSlot {
                time: time.clone(),
                state: classify(&line[*end..until]),
            });
        }
    }
    finish(slots)
}

fn key_in(key: &str, keys: &[&str]) -> bool {
    let key = key.to_ascii_lowercase();
    keys.contains(&key.as_str())
}

fn exact_clock(text: &str) -> Option<String> {
    let matches = clock_matches(text.trim());
    match matches.as_slice() {
        [(0, end, time)] if *end == text.trim().len() => Some(time.clone()),
        _ => None,
    }
}

fn object_slot(map: &serde_json::Map<String, Value>) -> Option<TimeSlot> {
    let time = map
        .iter()
        .filter(|(k, _)| key_in(k, TIME_KEYS))
        .filter_map(|(_, v)| v.as_str())
        .find_map(|v| clock_matches(v).into_iter().next().map(|(_, _, t)| t))?;

    let mut state = SlotState::Available;
    for (key, value) in map {
        if key_in(key, AVAILABILITY_FLAGS) {
            if let Some(flag) = value.as_bool() {
                state = if flag { SlotState::Available } else { SlotState::Taken };
            }
        } else if key_in(key, TAKEN_FLAGS) {
            if value.as_bool() == Some(true) {
                state = SlotState::Taken;
            }
        } else if key_in(key, STATE_KEYS) {
            if let Some(raw) = value.as_str() {
                state = classify(raw);
            }
        }
    }
    Some(TimeSlot { time, state })
}

fn walk_json(value: &Value, depth: usize, out: &mut Vec<TimeSlot>) {
    if depth > 8 {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(slot) = object_slot(map) {
                out.push(slot);
                return;
            }
            for child in map.values() {
                walk_json(child, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_json(item, depth + 1, out);
            }
        }
        Value::String(s) if depth > 0 => {
            if let Some(time) = exact_clock(s) {
                out.push(TimeSlot {
                    time,
                    state: SlotState::Available,
                });
            }
        }
        _ => {}
    }
}

/// Slots from a structured payload: objects with a time-like key (and
/// optional availability fields) or bare `"HH:MM"` strings in arrays.
pub fn parse_slot_json(value: &Value) -> Vec<TimeSlot> {
    let mut out = Vec::new();
    walk_json(value, 0, &mut out);
    finish(out)
}

fn url_hints_slots(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    SLOT_URL_HINTS.iter().any(|h| url.contains(h))
}

/// Slots from intercepted background responses, in arrival order.
pub fn parse_captured(responses: &[CapturedResponse]) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    for response in responses {
        let Some(body) = response.body.as_deref() else {
            continue;
        };
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            slots.extend(parse_slot_json(&json));
        } else if response.mime_type.starts_with("text/plain") && url_hints_slots(&response.url) {
            slots.extend(parse_slot_text(body));
        }
    }
    finish(slots)
}

/// Page listener buffering background responses that may carry slot data.
#[derive(Default)]
pub struct ResponseCollector {
    responses: Mutex<Vec<CapturedResponse>>,
}

impl ResponseCollector {
    fn relevant(response: &CapturedResponse) -> bool {
        if !(200..300).contains(&response.status) || response.body.is_none() {
            return false;
        }
        response.is_json() || (response.mime_type.starts_with("text/plain") && url_hints_slots(&response.url))
    }

    pub fn snapshot(&self) -> Vec<CapturedResponse> {
        self.responses.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.responses.lock().len()
    }

    /// Drops everything seen so far, e.g. the default day loaded before a
    /// date was picked.
    pub fn clear(&self) {
        self.responses.lock().clear();
    }
}

impl PageListener for ResponseCollector {
    fn on_event(&self, event: &PageEvent) {
        if let PageEvent::ResponseReceived(response) = event {
            if Self::relevant(response) {
                self.responses.lock().push(response.clone());
            }
        }
    }
}

pub struct InterceptedResponseStrategy {
    pub collector: std::sync::Arc<ResponseCollector>,
}

#[async_trait]
impl Strategy<TimeSlot> for InterceptedResponseStrategy {
    fn name(&self) -> &'static str {
        "slot-intercepted-responses"
    }

    async fn try_extract(&self, _page: &dyn PageDriver) -> Result<Option<Vec<TimeSlot>>, ScrapeError> {
        let responses = self.collector.snapshot();
        if responses.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_captured(&responses)))
    }
}

pub struct RenderedTextStrategy;

#[async_trait]
impl Strategy<TimeSlot> for RenderedTextStrategy {
    fn name(&self) -> &'static str {
        "slot-rendered-text"
    }

    async fn try_extract(&self, page: &dyn PageDriver) -> Result<Option<Vec<TimeSlot>>, ScrapeError> {
        let text = page.inner_text().await?;
        Ok(Some(parse_slot_text(&text)))
    }
}

pub fn strategies(collector: std::sync::Arc<ResponseCollector>) -> Vec<Box<dyn Strategy<TimeSlot>>> {
    vec![
        Box::new(InterceptedResponseStrategy { collector }),
        Box::new(RenderedTextStrategy),
    ]
}

/// Default caller policy: only bookable slots unless `include_taken`.
pub fn filter_slots(slots: Vec<TimeSlot>, include_taken: bool) -> Vec<TimeSlot> {
    if include_taken {
        return slots;
    }
    slots.into_iter().filter(|s| s.state.is_bookable()).collect()
}

#[cfg(test)]
#[path = "slots_tests.rs"]
mod tests;
