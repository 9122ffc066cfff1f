//! UI-interaction primitives used to walk the booking flow.
//!
//! Every click primitive tries a structural query first and degrades to a
//! text scan. None of them fail: "not found" is reported as `false` and the
//! caller decides whether that matters.

use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::browser::{ClickTarget, ElementInfo, PageDriver};
use crate::normalize::normalize;

/// Elements that normally react to clicks.
pub const INTERACTIVE_SELECTOR: &str = "button, a, [role='button'], [role='tab'], [role='option'], \
     label, input[type='button'], input[type='submit']";

/// Last-resort selector covering the whole rendered document.
pub const FULL_SCAN_SELECTOR: &str = "body *";

/// Day cells of the date pickers seen on booking widgets.
pub const CALENDAR_SELECTORS: &[&str] = &[
    "[data-date]",
    "[class*='calendar'] td",
    "[class*='calendario'] td",
    "[class*='calendar'] button",
    "[class*='calendario'] button",
    "[class*='datepicker'] td",
    "[role='gridcell']",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    /// Exact match, then the first element containing the target.
    FirstContaining,
    /// Exact match, then the containing element with the shortest text.
    Tightest,
}

fn labels(el: &ElementInfo) -> impl Iterator<Item = String> + '_ {
    std::iter::once(el.text.as_str())
        .chain(el.title.as_deref())
        .chain(el.value.as_deref())
        .map(normalize)
        .filter(|l| !l.is_empty())
}

fn best_match<'a>(candidates: &'a [ElementInfo], target: &str, mode: MatchMode) -> Option<&'a ElementInfo> {
    if target.is_empty() {
        return None;
    }
    let visible: Vec<&ElementInfo> = candidates.iter().filter(|el| el.visible).collect();

    if let Some(exact) = visible.iter().copied().find(|el| labels(el).any(|l| l == target)) {
        return Some(exact);
    }

    let mut containing = visible
        .iter()
        .copied()
        .filter(|el| labels(el).any(|l| l.contains(target)));
    match mode {
        MatchMode::FirstContaining => containing.next(),
        MatchMode::Tightest => containing.min_by_key(|el| el.text.chars().count()),
    }
}

async fn click_matching(
    page: &dyn PageDriver,
    selector: &str,
    target: &str,
    mode: MatchMode,
    click: ClickTarget,
) -> bool {
    let candidates = match page.query_all(selector).await {
        Ok(candidates) => candidates,
        Err(e) => {
            debug!(selector, "query failed: {}", e);
            return false;
        }
    };
    let Some(element) = best_match(&candidates, target, mode) else {
        return false;
    };
    match page.click_nth(selector, element.index, click).await {
        Ok(clicked) => clicked,
        Err(e) => {
            debug!(selector, index = element.index, "click failed: {}", e);
            false
        }
    }
}

/// Clicks the first interactive element whose normalized text contains
/// `text`, falling back to a full-DOM scan.
pub async fn click_by_visible_text(page: &dyn PageDriver, text: &str) -> bool {
    let target = normalize(text);
    if target.is_empty() {
        return false;
    }

    if click_matching(page, INTERACTIVE_SELECTOR, &target, MatchMode::FirstContaining, ClickTarget::Itself).await {
        debug!(text, "clicked by structural query");
        return true;
    }
    if click_matching(page, FULL_SCAN_SELECTOR, &target, MatchMode::Tightest, ClickTarget::ClickableAncestor).await {
        debug!(text, "clicked by full-DOM scan");
        return true;
    }
    debug!(text, "no element with that text");
    false
}

/// Tries each phrase in order; returns the one that was clicked.
pub async fn click_first_visible_text<'a>(page: &dyn PageDriver, phrases: &[&'a str]) -> Option<&'a str> {
    for phrase in phrases {
        if click_by_visible_text(page, phrase).await {
            return Some(phrase);
        }
    }
    None
}

/// Within the candidates matched by `container_selector`, clicks the one
/// whose title, text or value equals (or else contains) `text`.
pub async fn click_element_in_container_by_text(page: &dyn PageDriver, container_selector: &str, text: &str) -> bool {
    let target = normalize(text);
    click_matching(
        page,
        container_selector,
        &target,
        MatchMode::FirstContaining,
        ClickTarget::ClickableDescendant,
    )
    .await
}

/// Runs [`click_element_in_container_by_text`] over alternative containers,
/// then falls back to [`click_by_visible_text`].
pub async fn click_option(page: &dyn PageDriver, container_selectors: &[&str], text: &str) -> bool {
    for selector in container_selectors {
        if click_element_in_container_by_text(page, selector, text).await {
            debug!(selector, text, "clicked inside container");
            return true;
        }
    }
    click_by_visible_text(page, text).await
}

async fn click_first_where<F>(page: &dyn PageDriver, selectors: &[&str], accept: F) -> bool
where
    F: Fn(&ElementInfo) -> bool,
{
    for selector in selectors {
        let candidates = match page.query_all(selector).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!(selector, "query failed: {}", e);
                continue;
            }
        };
        let Some(cell) = candidates.iter().find(|c| c.visible && accept(c)) else {
            continue;
        };
        match page.click_nth(selector, cell.index, ClickTarget::Itself).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!(selector, index = cell.index, "click failed: {}", e),
        }
    }
    false
}

/// Clicks the calendar cell for `date`. Cells carrying the ISO date in a
/// value or title attribute win over cells showing only the day of month.
pub async fn click_calendar_date(page: &dyn PageDriver, date: NaiveDate) -> bool {
    let iso = date.format("%Y-%m-%d").to_string();
    let by_attribute = |c: &ElementInfo| {
        [c.value.as_deref(), c.title.as_deref()]
            .into_iter()
            .flatten()
            .any(|v| v.trim() == iso)
    };
    if click_first_where(page, CALENDAR_SELECTORS, by_attribute).await {
        debug!(%date, "clicked calendar cell by attribute");
        return true;
    }

    let day = date.day().to_string();
    let by_day = |c: &ElementInfo| c.text.trim().trim_start_matches('0') == day;
    if click_first_where(page, CALENDAR_SELECTORS, by_day).await {
        debug!(%date, "clicked calendar cell by day of month");
        return true;
    }
    debug!(%date, "no calendar cell for date");
    false
}

/// Waits for the first of `selectors` to appear, then applies the fixed
/// `settle_delay` so asynchronous re-renders can finish. Returns whether any
/// selector matched.
pub async fn wait_for_content_settle(
    page: &dyn PageDriver,
    selectors: &[&str],
    timeout: Duration,
    settle_delay: Duration,
) -> bool {
    let per_selector = if selectors.is_empty() {
        Duration::ZERO
    } else {
        timeout / selectors.len() as u32
    };

    let mut matched = false;
    for selector in selectors {
        match page.wait_for_selector(selector, per_selector).await {
            Ok(true) => {
                matched = true;
                break;
            }
            Ok(false) => {}
            Err(e) => debug!(selector, "wait failed: {}", e),
        }
    }

    if !settle_delay.is_zero() {
        tokio::time::sleep(settle_delay).await;
    }
    matched
}

#[cfg(test)]
#[path = "navigator_tests.rs"]
mod tests;
