use super::*;
use crate::browser::fake::{FakeElement, FakeLauncher, FakeSite, Screen};
use crate::browser::BrowserLauncher;

fn element(index: usize, text: &str) -> ElementInfo {
    ElementInfo {
        index,
        text: text.to_string(),
        visible: true,
        ..Default::default()
    }
}

async fn page_for(site: FakeSite) -> Box<dyn PageDriver> {
    let launcher = FakeLauncher::new(site);
    let browser = launcher.launch().await.unwrap();
    let page = browser.new_page().await.unwrap();
    page.goto("https://agenda.example.test", Duration::from_secs(1)).await.unwrap();
    page
}

async fn current_text(page: &dyn PageDriver) -> String {
    page.inner_text().await.unwrap()
}

#[test]
fn test_best_match_prefers_exact() {
    let candidates = vec![
        element(0, "Medicina General Adultos"),
        element(1, "Medicina General"),
    ];
    let hit = best_match(&candidates, "medicina general", MatchMode::FirstContaining).unwrap();
    assert_eq!(hit.index, 1);
}

#[test]
fn test_best_match_first_containing() {
    let candidates = vec![
        element(0, "Inicio"),
        element(4, "Reservar Hora Online"),
        element(7, "Reservar hora telefónica"),
    ];
    let hit = best_match(&candidates, "reservar hora", MatchMode::FirstContaining).unwrap();
    assert_eq!(hit.index, 4);
}

#[test]
fn test_best_match_tightest_for_full_scan() {
    let candidates = vec![
        element(0, "Bienvenido Reservar hora Contacto"),
        element(3, "Reservar hora ahora"),
        element(9, "Cancelar"),
    ];
    let hit = best_match(&candidates, "reservar hora", MatchMode::Tightest).unwrap();
    assert_eq!(hit.index, 3);
}

#[test]
fn test_best_match_uses_title_and_skips_hidden() {
    let mut hidden = element(0, "Kinesiología");
    hidden.visible = false;
    let titled = ElementInfo {
        index: 2,
        title: Some("KINESIOLOGÍA".into()),
        visible: true,
        ..Default::default()
    };
    let candidates = vec![hidden, titled];
    let hit = best_match(&candidates, "kinesiologia", MatchMode::FirstContaining).unwrap();
    assert_eq!(hit.index, 2);
}

#[test]
fn test_best_match_empty_target() {
    assert!(best_match(&[element(0, "x")], "", MatchMode::Tightest).is_none());
}

#[tokio::test]
async fn test_click_by_visible_text_structural() {
    let site = FakeSite::new("home")
        .screen("home", Screen::new().element(FakeElement::button("Reservar Hora").goes_to("flow")))
        .screen("flow", Screen::new().text("Seleccione especialidad"));
    let page = page_for(site).await;

    assert!(click_by_visible_text(page.as_ref(), "reservar hora").await);
    assert_eq!(current_text(page.as_ref()).await, "Seleccione especialidad");
}

#[tokio::test]
async fn test_click_by_visible_text_falls_back_to_full_scan() {
    let site = FakeSite::new("home")
        .screen(
            "home",
            Screen::new()
                .element(FakeElement::button("Contacto"))
                .element(FakeElement::text("Por Especialidad").goes_to("specialties")),
        )
        .screen("specialties", Screen::new().text("Kinesiología"));
    let page = page_for(site).await;

    assert!(click_by_visible_text(page.as_ref(), "por especialidad").await);
    assert_eq!(current_text(page.as_ref()).await, "Kinesiología");
}

#[tokio::test]
async fn test_click_by_visible_text_not_found_is_soft() {
    let page = page_for(FakeSite::blank()).await;
    assert!(!click_by_visible_text(page.as_ref(), "Reservar").await);
    assert!(!click_by_visible_text(page.as_ref(), "   ").await);
}

#[tokio::test]
async fn test_click_first_visible_text() {
    let site = FakeSite::new("home")
        .screen("home", Screen::new().element(FakeElement::button("Agenda Online").goes_to("flow")))
        .screen("flow", Screen::new());
    let page = page_for(site).await;

    let clicked = click_first_visible_text(page.as_ref(), &["Reservar hora", "Agenda online"]).await;
    assert_eq!(clicked, Some("Agenda online"));
}

#[tokio::test]
async fn test_click_in_container_by_title() {
    let site = FakeSite::new("list")
        .screen(
            "list",
            Screen::new()
                .element(FakeElement::new(".specialty-item", "Cardio").with_title("Cardiología"))
                .element(FakeElement::new(".specialty-item", "Kine").with_title("Kinesiología").goes_to("pros")),
        )
        .screen("pros", Screen::new().text("Dr. Ana Lopez"));
    let page = page_for(site).await;

    assert!(click_element_in_container_by_text(page.as_ref(), ".specialty-item", "kinesiologia").await);
    assert_eq!(current_text(page.as_ref()).await, "Dr. Ana Lopez");
}

#[tokio::test]
async fn test_click_option_falls_back_to_visible_text() {
    let site = FakeSite::new("list")
        .screen("list", Screen::new().element(FakeElement::button("Dermatología").goes_to("pros")))
        .screen("pros", Screen::new().text("ok"));
    let page = page_for(site).await;

    assert!(click_option(page.as_ref(), &[".specialty-item", "[role='option']"], "Dermatologia").await);
    assert_eq!(current_text(page.as_ref()).await, "ok");
}

#[tokio::test]
async fn test_wait_for_content_settle() {
    let site = FakeSite::new("home").screen("home", Screen::new().ready(".slots"));
    let page = page_for(site).await;

    assert!(wait_for_content_settle(page.as_ref(), &[".missing", ".slots"], Duration::from_millis(50), Duration::ZERO).await);
    assert!(!wait_for_content_settle(page.as_ref(), &[".missing"], Duration::from_millis(50), Duration::ZERO).await);
    assert!(!wait_for_content_settle(page.as_ref(), &[], Duration::from_millis(50), Duration::from_millis(1)).await);
}

#[tokio::test]
async fn test_click_calendar_date_by_attribute() {
    let site = FakeSite::new("calendar")
        .screen(
            "calendar",
            Screen::new()
                .element(FakeElement::new("[data-date]", "20").with_value("2026-10-20"))
                .element(FakeElement::new("[data-date]", "21").with_value("2026-10-21").goes_to("day")),
        )
        .screen("day", Screen::new().text("15:00"));
    let page = page_for(site).await;

    let date = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
    assert!(click_calendar_date(page.as_ref(), date).await);
    assert_eq!(current_text(page.as_ref()).await, "15:00");
}

#[tokio::test]
async fn test_click_calendar_date_by_day_of_month() {
    let site = FakeSite::new("calendar")
        .screen(
            "calendar",
            Screen::new()
                .element(FakeElement::new("[role='gridcell']", "1"))
                .element(FakeElement::new("[role='gridcell']", "05").goes_to("day"))
                .element(FakeElement::new("[role='gridcell']", "15")),
        )
        .screen("day", Screen::new().text("ok"));
    let page = page_for(site).await;

    let date = NaiveDate::from_ymd_opt(2026, 11, 5).unwrap();
    assert!(click_calendar_date(page.as_ref(), date).await);
    assert_eq!(current_text(page.as_ref()).await, "ok");

    let missing = NaiveDate::from_ymd_opt(2026, 11, 30).unwrap();
    assert!(!click_calendar_date(page.as_ref(), missing).await);
}
