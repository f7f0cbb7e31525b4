//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock listing pages and run the full
//! hierarchy traversal end-to-end, including resumption across runs.

use geo_harvester::config::{parse_config, Config};
use geo_harvester::crawler::{CrawlOptions, HierarchyCrawler, HttpFetchSession};
use geo_harvester::session::{SessionCookie, SessionGate};
use geo_harvester::state::{IssueKind, RunStatus};
use geo_harvester::storage::{
    open_table_store, City, Country, EntityStore, LeafItem, Location, OffsetTracker, Scope,
};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG_TEMPLATE: &str = r#"
[crawler]
page-cap = 10
leaf-batch-limit = LEAF_BATCH_LIMIT
forced-pause-secs = 0
max-consecutive-blocks = 3

[throttle]
request-threshold = 1000
cooldown-secs = 0

[pacing]
night = { min-ms = 0, max-ms = 0 }
morning = { min-ms = 0, max-ms = 0 }
day = { min-ms = 0, max-ms = 0 }
evening = { min-ms = 0, max-ms = 0 }
sibling = { min-ms = 0, max-ms = 0 }
break-probability = 0.0
min-interval-ms = 0
burst-ceiling = 10000
emergency-pause-secs = 0

[session]
path = "DATA_DIR/session.json"
probe-url = "BASE/accounts/edit/"
active-markers = ["Edit profile"]

[storage]
data-dir = "DATA_DIR/data"
backend = "json"

[platform]
user-agent = "Mozilla/5.0 (X11; Linux x86_64)"
timeout-secs = 5
block-markers = ["Please wait a few minutes"]
auth-markers = ["Log in to continue"]

[levels.countries]
url = "BASE/countries/?page={page}"

[levels.countries.extract]
item = "li.country"

[levels.countries.extract.fields]
code = { selector = "span.code" }
name = { selector = "a" }
url = { selector = "a", attribute = "href" }

[levels.cities]
url = "BASE/countries/{country}/?page={page}"

[levels.cities.extract]
item = "li.city"

[levels.cities.extract.fields]
id = { selector = "a", attribute = "href", capture = "/cities/([^/]+)/" }
name = { selector = "a" }

[levels.locations]
url = "BASE/cities/{city}/?page={page}"

[levels.locations.extract]
item = "li.location"

[levels.locations.extract.fields]
id = { selector = "a", attribute = "href", capture = "/locations/([^/]+)/" }
name = { selector = "a" }

[levels.leaf-items]
url = "BASE/locations/{location}/?offset={offset}"
requires-auth = LEAF_REQUIRES_AUTH

[levels.leaf-items.extract]
item = "div.item"

[levels.leaf-items.extract.fields]
external_id = { selector = "span.handle" }
bio = { selector = "span.bio" }
"#;

/// Builds a zero-delay configuration pointing at the mock server
fn create_test_config(
    base_url: &str,
    dir: &Path,
    leaf_batch_limit: u32,
    leaf_requires_auth: bool,
) -> Config {
    let toml = CONFIG_TEMPLATE
        .replace("BASE", base_url)
        .replace("DATA_DIR", &dir.to_string_lossy())
        .replace("LEAF_BATCH_LIMIT", &leaf_batch_limit.to_string())
        .replace("LEAF_REQUIRES_AUTH", &leaf_requires_auth.to_string());
    parse_config(&toml).expect("Test configuration should be valid")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html")
}

fn country_list(countries: &[(&str, &str)]) -> ResponseTemplate {
    let items: String = countries
        .iter()
        .map(|(code, name)| {
            format!(
                concat!(
                    r#"<li class="country"><a href="/countries/{}/">{}</a>"#,
                    r#"<span class="code">{}</span></li>"#
                ),
                code, name, code
            )
        })
        .collect();
    html(&format!("<ul>{}</ul>", items))
}

fn city_list(cities: &[(&str, &str)]) -> ResponseTemplate {
    let items: String = cities
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<li class="city"><a href="/cities/{}/">{}</a></li>"#,
                id, name
            )
        })
        .collect();
    html(&format!("<ul>{}</ul>", items))
}

fn location_list(locations: &[(&str, &str)]) -> ResponseTemplate {
    let items: String = locations
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<li class="location"><a href="/locations/{}/">{}</a></li>"#,
                id, name
            )
        })
        .collect();
    html(&format!("<ul>{}</ul>", items))
}

fn leaf_list(handles: &[&str]) -> ResponseTemplate {
    let items: String = handles
        .iter()
        .map(|handle| {
            format!(
                concat!(
                    r#"<div class="item"><span class="handle">{}</span>"#,
                    r#"<span class="bio">bio of {}</span></div>"#
                ),
                handle, handle
            )
        })
        .collect();
    html(&items)
}

async fn mount_page(
    server: &MockServer,
    route: &str,
    key: &str,
    value: &str,
    response: ResponseTemplate,
    times: u64,
) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(query_param(key, value))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

/// UA → Kyiv (c1) → Maidan (l1) with three leaf items; PL has no cities
async fn mount_small_hierarchy(server: &MockServer) {
    mount_page(
        server,
        "/countries/",
        "page",
        "1",
        country_list(&[("UA", "Ukraine"), ("PL", "Poland")]),
        1,
    )
    .await;
    mount_page(server, "/countries/", "page", "2", country_list(&[]), 1).await;
    mount_page(server, "/countries/UA/", "page", "1", city_list(&[("c1", "Kyiv")]), 1).await;
    mount_page(server, "/countries/UA/", "page", "2", city_list(&[]), 1).await;
    mount_page(server, "/countries/PL/", "page", "1", city_list(&[]), 1).await;
    mount_page(server, "/cities/c1/", "page", "1", location_list(&[("l1", "Maidan")]), 1).await;
    mount_page(server, "/cities/c1/", "page", "2", location_list(&[]), 1).await;
}

async fn run_once(config: Config, options: &CrawlOptions) -> geo_harvester::RunReport {
    let store = open_table_store(&config.storage).expect("Failed to open storage");
    let mut session =
        HttpFetchSession::new(&config.platform).expect("Failed to build fetch session");
    let mut crawler = HierarchyCrawler::new(config, "integration", store).with_pacing_seed(7);
    crawler.run(&mut session, options).await.expect("Run failed")
}

#[tokio::test]
async fn test_full_traversal_persists_every_level() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");

    mount_small_hierarchy(&mock_server).await;
    mount_page(
        &mock_server,
        "/locations/l1/",
        "offset",
        "0",
        leaf_list(&["alice", "bob", "carol"]),
        1,
    )
    .await;
    mount_page(&mock_server, "/locations/l1/", "offset", "3", leaf_list(&[]), 1).await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 20, false);
    let storage_config = config.storage.clone();
    let report = run_once(config, &CrawlOptions::default()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.requests, 9);
    assert_eq!(report.countries.added, 2);
    assert_eq!(report.cities.added, 1);
    assert_eq!(report.locations.added, 1);
    assert_eq!(report.leaf_items.added, 3);

    // Exactly the documented file layout under the data directory
    let data = dir.path().join("data");
    for file in [
        "countries.json",
        "cities_UA.json",
        "cities_PL.json",
        "locations_c1_kyiv.json",
        "leaf_items_l1.json",
        "parsing_progress.json",
        "cache/location_l1.json",
        "last_run.json",
    ] {
        assert!(data.join(file).exists(), "missing {}", file);
    }

    let store = open_table_store(&storage_config).expect("Failed to reopen storage");
    let entities = EntityStore::new(store.clone());

    let countries: Vec<Country> = entities.load(&Scope::Countries).unwrap();
    assert_eq!(countries[0].code, "UA");
    assert!(countries[0].source_url.ends_with("/countries/UA/"));

    let cities: Vec<City> = entities
        .load(&Scope::Cities {
            country_code: "UA".to_string(),
        })
        .unwrap();
    assert_eq!(cities.len(), 1);
    assert_eq!(cities[0].id, "c1");
    assert_eq!(cities[0].country_code, "UA");

    let locations: Vec<Location> = entities
        .load(&Scope::Locations {
            city_id: "c1".to_string(),
            city_name: "Kyiv".to_string(),
        })
        .unwrap();
    assert_eq!(locations[0].id, "l1");

    let items: Vec<LeafItem> = entities
        .load(&Scope::LeafItems {
            location_id: "l1".to_string(),
        })
        .unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].external_id, "bob");
    assert_eq!(items[1].attributes.get("bio").map(String::as_str), Some("bio of bob"));
    assert_eq!(items[1].discovered_in_location_id, "l1");

    assert_eq!(OffsetTracker::new(store).get_offset("l1").unwrap(), 3);
}

#[tokio::test]
async fn test_blocked_country_does_not_stop_siblings() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");

    mount_page(
        &mock_server,
        "/countries/",
        "page",
        "1",
        country_list(&[("PL", "Poland"), ("UA", "Ukraine")]),
        1,
    )
    .await;
    mount_page(&mock_server, "/countries/", "page", "2", country_list(&[]), 1).await;
    mount_page(&mock_server, "/countries/PL/", "page", "1", ResponseTemplate::new(429), 1).await;
    mount_page(
        &mock_server,
        "/countries/UA/",
        "page",
        "1",
        city_list(&[("c1", "Kyiv"), ("c2", "Lviv")]),
        1,
    )
    .await;
    mount_page(&mock_server, "/countries/UA/", "page", "2", city_list(&[]), 1).await;
    for city in ["c1", "c2"] {
        let route = format!("/cities/{}/", city);
        mount_page(&mock_server, &route, "page", "1", location_list(&[]), 1).await;
    }

    let config = create_test_config(&mock_server.uri(), dir.path(), 20, false);
    let report = run_once(config, &CrawlOptions::default()).await;

    assert_eq!(report.status, RunStatus::Blocked);
    assert!(report.halt.is_none());
    let blocked: Vec<_> = report.issues_of(IssueKind::Blocked).collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].scope, "country PL");
    assert_eq!(report.cities.added, 2);

    // The blocked branch left no table behind, so the next run retries it
    assert!(!dir.path().join("data/cities_PL.json").exists());
    assert!(dir.path().join("data/cities_UA.json").exists());
}

#[tokio::test]
async fn test_resume_continues_from_offset_then_serves_cache() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");

    // First run: one leaf batch per location
    mount_small_hierarchy(&mock_server).await;
    mount_page(
        &mock_server,
        "/locations/l1/",
        "offset",
        "0",
        leaf_list(&["alice", "bob", "carol"]),
        1,
    )
    .await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 1, false);
    let first = run_once(config.clone(), &CrawlOptions::default()).await;
    assert_eq!(first.leaf_items.added, 3);
    assert!(!dir.path().join("data/cache/location_l1.json").exists());
    mock_server.verify().await;
    mock_server.reset().await;

    // Second run: listings are already known, only the leaf cursor moves
    mount_page(&mock_server, "/countries/", "page", "1", country_list(&[]), 0).await;
    mount_page(&mock_server, "/countries/UA/", "page", "1", city_list(&[]), 0).await;
    mount_page(&mock_server, "/cities/c1/", "page", "1", location_list(&[]), 0).await;
    mount_page(&mock_server, "/locations/l1/", "offset", "0", leaf_list(&[]), 0).await;
    mount_page(&mock_server, "/locations/l1/", "offset", "3", leaf_list(&["bob", "dave"]), 1).await;
    mount_page(&mock_server, "/locations/l1/", "offset", "4", leaf_list(&[]), 1).await;

    // PL has no cities yet and would be retried; keep these runs on UA
    let ua_only = CrawlOptions {
        fresh: false,
        countries: vec!["UA".to_string()],
    };
    let mut config = config;
    config.crawler.leaf_batch_limit = 5;
    let second = run_once(config.clone(), &ua_only).await;
    assert_eq!(second.leaf_items.added, 1);
    assert_eq!(second.requests, 2);
    assert!(dir.path().join("data/cache/location_l1.json").exists());
    mock_server.verify().await;
    mock_server.reset().await;

    // Third run: the fresh cache answers without any request
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let third = run_once(config, &ua_only).await;
    assert_eq!(third.cache_hits, 1);
    assert_eq!(third.requests, 0);
    assert_eq!(third.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_active_session_unlocks_auth_levels() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), dir.path(), 20, true);

    let gate = SessionGate::new(&config.session, true);
    gate.complete_manual_auth(vec![SessionCookie::new("sessionid", "abc123", "127.0.0.1")])
        .expect("Failed to store session");

    Mock::given(method("GET"))
        .and(path("/accounts/edit/"))
        .respond_with(html("<h1>Edit profile</h1>"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_small_hierarchy(&mock_server).await;
    mount_page(&mock_server, "/locations/l1/", "offset", "0", leaf_list(&["alice"]), 1).await;
    mount_page(&mock_server, "/locations/l1/", "offset", "1", leaf_list(&[]), 1).await;

    let report = run_once(config, &CrawlOptions::default()).await;

    assert!(report.authenticated);
    assert_eq!(report.leaf_items.added, 1);
    assert_eq!(report.issues_of(IssueKind::AuthRequired).count(), 0);
    assert!(gate.load().expect("Session should be readable").is_some());
}

#[tokio::test]
async fn test_expired_session_is_purged_and_run_continues_as_guest() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), dir.path(), 20, true);

    let gate = SessionGate::new(&config.session, true);
    gate.complete_manual_auth(vec![SessionCookie::new("sessionid", "expired", "127.0.0.1")])
        .expect("Failed to store session");

    // The platform bounces an expired session to the login page
    Mock::given(method("GET"))
        .and(path("/accounts/edit/"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/accounts/login/"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/login/"))
        .respond_with(html("<form>Log in</form>"))
        .mount(&mock_server)
        .await;
    mount_small_hierarchy(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/locations/l1/"))
        .respond_with(leaf_list(&["alice"]))
        .expect(0)
        .mount(&mock_server)
        .await;

    let report = run_once(config, &CrawlOptions::default()).await;

    assert!(!report.authenticated);
    assert!(!gate.path().exists());
    let auth: Vec<_> = report.issues_of(IssueKind::AuthRequired).collect();
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].scope, "location l1");
    assert_eq!(report.status, RunStatus::Partial);
}

#[tokio::test]
async fn test_country_filter_limits_traversal() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");

    mount_page(
        &mock_server,
        "/countries/",
        "page",
        "1",
        country_list(&[("UA", "Ukraine"), ("PL", "Poland")]),
        1,
    )
    .await;
    mount_page(&mock_server, "/countries/", "page", "2", country_list(&[]), 1).await;
    mount_page(&mock_server, "/countries/UA/", "page", "1", city_list(&[]), 1).await;
    mount_page(&mock_server, "/countries/PL/", "page", "1", city_list(&[]), 0).await;

    let config = create_test_config(&mock_server.uri(), dir.path(), 20, false);
    let options = CrawlOptions {
        fresh: false,
        countries: vec!["UA".to_string()],
    };
    let report = run_once(config, &options).await;

    assert_eq!(report.countries.added, 2);
    assert_eq!(report.requests, 3);
}
