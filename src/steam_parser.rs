//! HTML parsing for steamcommunity.com pages.
//!
//! Pure functions over page text, kept separate from the HTTP client so
//! the selectors can be tested against fixtures. Steam has no stable API
//! for user screenshots; when the markup changes, failing tests here
//! pinpoint what broke.

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProfile {
    pub profile_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGame {
    pub app_id: u32,
    pub name: String,
    pub screenshot_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridScreenshot {
    pub steam_screenshot_id: String,
    pub detail_url: String,
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenshotDetail {
    pub full_image_url: Option<String>,
    pub description: Option<String>,
    pub taken_at: Option<NaiveDateTime>,
}

// Steam renders dates in a handful of locale-dependent shapes.
const DATE_FORMATS: &[&str] = &[
    "%b %d, %Y @ %I:%M%p",
    "%b %d, %Y, %I:%M%p",
    "%d %b, %Y @ %I:%M%p",
    "%d %b, %Y, %I:%M%p",
    "%b %d, %Y @ %I:%M %p",
    "%d %b, %Y @ %I:%M %p",
];

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"id=(\d+)").expect("static regex"))
}

fn appid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"appid=(\d+)").expect("static regex"))
}

fn digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").expect("static regex"))
}

/// True when the page is Steam's error shell (missing or private profile).
pub fn is_error_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    doc.select(&sel(".error_ctn")).next().is_some()
}

/// Extracts display name and avatar from a profile page.
pub fn parse_profile(html: &str) -> ParsedProfile {
    let doc = Html::parse_document(html);

    let profile_name = doc
        .select(&sel(".actual_persona_name"))
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let avatar_url = doc
        .select(&sel(".playerAvatarAutoSizeInner img"))
        .next()
        .and_then(|el| el.value().attr("src"))
        .map(|s| s.to_string());

    ParsedProfile {
        profile_name,
        avatar_url,
    }
}

/// Parses the game filter sidebar of the screenshots landing page into
/// per-game screenshot counts.
pub fn parse_game_sidebar(html: &str) -> Vec<DiscoveredGame> {
    let doc = Html::parse_document(html);
    let mut games = Vec::new();

    for item in doc.select(&sel(".screenshot_filter_app")) {
        let app_id = item
            .value()
            .attr("data-appid")
            .and_then(|v| v.parse::<u32>().ok())
            .or_else(|| {
                item.select(&sel("a"))
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(|href| appid_regex().captures(href))
                    .and_then(|c| c[1].parse::<u32>().ok())
            });

        let Some(app_id) = app_id else { continue };
        if app_id == 0 {
            continue;
        }

        let name = item
            .select(&sel(".screenshot_filter_app_name"))
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("App {}", app_id));

        let screenshot_count = item
            .select(&sel(".screenshot_filter_app_count"))
            .next()
            .map(|el| el.text().collect::<String>().replace(',', ""))
            .and_then(|text| {
                digits_regex()
                    .captures(&text)
                    .and_then(|c| c[1].parse::<i64>().ok())
            })
            .unwrap_or(0);

        games.push(DiscoveredGame {
            app_id,
            name,
            screenshot_count,
        });
    }

    games
}

/// Parses one grid page into screenshot references, de-duplicated by
/// Steam screenshot id in document order.
pub fn parse_grid_page(html: &str) -> Vec<GridScreenshot> {
    let doc = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    let mut screenshots = Vec::new();

    for anchor in doc.select(&sel("a[href*='filedetails']")) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(captures) = id_regex().captures(href) else {
            continue;
        };
        let id = captures[1].to_string();
        if !seen.insert(id.clone()) {
            continue;
        }

        let thumb_url = anchor
            .select(&sel("img"))
            .next()
            .and_then(|img| {
                img.value()
                    .attr("src")
                    .or_else(|| img.value().attr("data-src"))
            })
            .map(|s| s.to_string());

        screenshots.push(GridScreenshot {
            steam_screenshot_id: id,
            detail_url: href.to_string(),
            thumb_url,
        });
    }

    screenshots
}

/// True when the detail page is hidden behind the mature-content gate.
pub fn has_age_gate(html: &str) -> bool {
    let doc = Html::parse_document(html);
    doc.select(&sel(".agegate_container")).next().is_some()
}

/// Extracts the full-resolution image URL, description and capture date
/// from a screenshot detail page.
pub fn parse_detail_page(html: &str) -> ScreenshotDetail {
    let doc = Html::parse_document(html);
    let mut detail = ScreenshotDetail::default();

    detail.full_image_url = doc
        .select(&sel(".actualmediactn a img, .screenshotActualSize img, #ActualMedia img"))
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(full_image_url);

    if detail.full_image_url.is_none() {
        // Fall back to a direct link to the CDN object.
        detail.full_image_url = doc
            .select(&sel(".actualmediactn a"))
            .next()
            .and_then(|a| a.value().attr("href"))
            .filter(|href| href.contains("ugc") || href.contains("akamaihd.net"))
            .map(full_image_url);
    }

    detail.description = doc
        .select(&sel(".screenshotDescription"))
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    detail.taken_at = doc
        .select(&sel(".detailsStatsContainerRight .detailsStatRight"))
        .filter_map(|el| parse_steam_date(&el.text().collect::<String>()))
        .next();

    detail
}

/// Strips the resize query parameters from a CDN thumbnail URL; the bare
/// path serves the full-size image.
pub fn full_image_url(thumb_url: &str) -> String {
    match thumb_url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => thumb_url.to_string(),
    }
}

/// Parses Steam's human-readable date strings ("21 Jan, 2024 @ 3:44pm").
pub fn parse_steam_date(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }
    // chrono wants zero-padded %I; Steam writes "3:44pm".
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_HTML: &str = r#"
        <html><body>
          <div class="playerAvatarAutoSizeInner">
            <img src="https://avatars.akamai.steamstatic.com/abc_full.jpg">
          </div>
          <span class="actual_persona_name">TestGamer42</span>
        </body></html>
    "#;

    const PROFILE_ERROR_HTML: &str = r#"
        <html><body>
          <div class="error_ctn"><h3>The specified profile could not be found.</h3></div>
        </body></html>
    "#;

    const GRID_HTML: &str = r#"
        <html><body>
          <div class="screenshot_filter_app" data-appid="292030">
            <a href="?appid=292030"><span class="screenshot_filter_app_name">The Witcher 3: Wild Hunt</span>
            <span class="screenshot_filter_app_count">42</span></a>
          </div>
          <div class="screenshot_filter_app" data-appid="1245620">
            <a href="?appid=1245620"><span class="screenshot_filter_app_name">ELDEN RING</span>
            <span class="screenshot_filter_app_count">1,337</span></a>
          </div>
          <div class="screenshot_filter_app" data-appid="220">
            <a href="?appid=220"><span class="screenshot_filter_app_name">Half-Life 2</span>
            <span class="screenshot_filter_app_count">3</span></a>
          </div>
          <div id="image_wall">
            <a class="profile_media_item" href="https://steamcommunity.com/sharedfiles/filedetails/?id=111222333">
              <img src="https://steamuserimages-a.akamaihd.net/ugc/1/thumb1/?imw=200&imh=112">
            </a>
            <a class="profile_media_item" href="https://steamcommunity.com/sharedfiles/filedetails/?id=444555666">
              <img src="https://steamuserimages-a.akamaihd.net/ugc/2/thumb2/?imw=200&imh=112">
            </a>
            <a class="profile_media_item" href="https://steamcommunity.com/sharedfiles/filedetails/?id=777888999">
              <img data-src="https://steamuserimages-a.akamaihd.net/ugc/3/thumb3/?imw=200&imh=112">
            </a>
            <a class="profile_media_item" href="https://steamcommunity.com/sharedfiles/filedetails/?id=111222333">
              <img src="https://steamuserimages-a.akamaihd.net/ugc/1/thumb1/?imw=200&imh=112">
            </a>
            <a href="https://steamcommunity.com/workshop/browse/">Workshop</a>
          </div>
        </body></html>
    "#;

    const DETAIL_HTML: &str = r#"
        <html><body>
          <div class="actualmediactn">
            <a href="https://steamuserimages-a.akamaihd.net/ugc/99/fullhash/">
              <img src="https://steamuserimages-a.akamaihd.net/ugc/99/fullhash/?imw=1024">
            </a>
          </div>
          <div class="screenshotDescription">A sunset over Limgrave</div>
          <div class="detailsStatsContainerRight">
            <div class="detailsStatRight">2.4 MB</div>
            <div class="detailsStatRight">21 Jan, 2024 @ 3:44pm</div>
            <div class="detailsStatRight">1920 x 1080</div>
          </div>
        </body></html>
    "#;

    const MATURE_HTML: &str = r#"
        <html><body>
          <div class="agegate_container">
            <div class="agegate_text_container">This content is intended for mature audiences.</div>
          </div>
        </body></html>
    "#;

    #[test]
    fn profile_name_and_avatar() {
        let profile = parse_profile(PROFILE_HTML);
        assert_eq!(profile.profile_name.as_deref(), Some("TestGamer42"));
        assert!(profile
            .avatar_url
            .as_deref()
            .unwrap()
            .contains("akamai.steamstatic.com"));
        assert!(!is_error_page(PROFILE_HTML));
    }

    #[test]
    fn detects_error_page() {
        assert!(is_error_page(PROFILE_ERROR_HTML));
        let profile = parse_profile(PROFILE_ERROR_HTML);
        assert!(profile.profile_name.is_none());
    }

    #[test]
    fn sidebar_games_with_counts() {
        let games = parse_game_sidebar(GRID_HTML);
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].app_id, 292030);
        assert!(games[0].name.contains("Witcher"));
        assert_eq!(games[0].screenshot_count, 42);
        // Comma-separated counts parse whole.
        assert_eq!(games[1].screenshot_count, 1337);
        assert_eq!(games[2].app_id, 220);
    }

    #[test]
    fn grid_page_screenshots_deduplicated() {
        let shots = parse_grid_page(GRID_HTML);
        assert_eq!(shots.len(), 3);
        assert_eq!(shots[0].steam_screenshot_id, "111222333");
        assert_eq!(shots[1].steam_screenshot_id, "444555666");
        assert_eq!(shots[2].steam_screenshot_id, "777888999");
        assert!(shots.iter().all(|s| s.detail_url.contains("filedetails")));
    }

    #[test]
    fn grid_page_thumbnails_including_lazy_loaded() {
        let shots = parse_grid_page(GRID_HTML);
        assert!(shots[0].thumb_url.as_deref().unwrap().contains("thumb1"));
        // Third item only carries data-src.
        assert!(shots[2].thumb_url.as_deref().unwrap().contains("thumb3"));
    }

    #[test]
    fn empty_grid_yields_nothing() {
        let html = r#"<html><body><div id="image_wall"></div></body></html>"#;
        assert!(parse_grid_page(html).is_empty());
        assert!(parse_game_sidebar(html).is_empty());
    }

    #[test]
    fn detail_page_full_url_description_date() {
        let detail = parse_detail_page(DETAIL_HTML);

        let url = detail.full_image_url.unwrap();
        assert!(url.contains("fullhash"));
        assert!(!url.contains("imw="));

        assert_eq!(detail.description.as_deref(), Some("A sunset over Limgrave"));

        let taken = detail.taken_at.unwrap();
        assert_eq!(taken.format("%Y-%m-%d %H:%M").to_string(), "2024-01-21 15:44");
    }

    #[test]
    fn age_gate_detection() {
        assert!(has_age_gate(MATURE_HTML));
        assert!(!has_age_gate(DETAIL_HTML));

        let detail = parse_detail_page(MATURE_HTML);
        assert!(detail.full_image_url.is_none());
    }

    #[test]
    fn steam_date_formats() {
        let cases = [
            ("21 Jan, 2024 @ 3:44pm", (2024, 1, 21, 15, 44)),
            ("Jan 21, 2024 @ 6:44am", (2024, 1, 21, 6, 44)),
            ("Mar 15, 2023, 11:22am", (2023, 3, 15, 11, 22)),
            ("15 Mar, 2023, 11:22am", (2023, 3, 15, 11, 22)),
            ("Jan 01, 2024 @ 12:00 pm", (2024, 1, 1, 12, 0)),
            ("Jan 01, 2024 @ 12:00am", (2024, 1, 1, 0, 0)),
        ];
        for (raw, (y, mo, d, h, mi)) in cases {
            let dt = parse_steam_date(raw).unwrap_or_else(|| panic!("failed: {}", raw));
            let formatted = dt.format("%Y-%m-%d %H:%M").to_string();
            assert_eq!(
                formatted,
                format!("{:04}-{:02}-{:02} {:02}:{:02}", y, mo, d, h, mi),
                "input: {}",
                raw
            );
        }
    }

    #[test]
    fn steam_date_garbage_and_whitespace() {
        assert!(parse_steam_date("").is_none());
        assert!(parse_steam_date("not a date at all").is_none());
        assert!(parse_steam_date("  21 Jan, 2024   @   3:44pm  ").is_some());
    }

    #[test]
    fn full_image_url_strips_query() {
        assert_eq!(
            full_image_url("https://x.akamaihd.net/ugc/a/h/?imw=256&imh=144"),
            "https://x.akamaihd.net/ugc/a/h/"
        );
        assert_eq!(
            full_image_url("https://x.akamaihd.net/ugc/a/h/"),
            "https://x.akamaihd.net/ugc/a/h/"
        );
    }
}
