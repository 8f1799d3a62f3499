//! Tiles fetched through the caching source and decoded into buckets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tilestream::storage::{FetchError, Freshness, HttpResponse, Validators};
use tilestream::style::{BucketKind, BucketRule, Filter, Style};
use tilestream::tile::{TileData, TileId, TileState};

use common::{wait_until, Harness, ScriptedClient};

const TEMPLATE: &str = "https://tiles.example.com/{z}/{x}/{y}.pbf";

fn water_client(gated: bool) -> Arc<ScriptedClient> {
    let script = |_: &str, _: Option<&Validators>| -> Result<HttpResponse, FetchError> {
        Ok(HttpResponse::Fresh {
            data: Bytes::from(common::water_tile()),
            freshness: Freshness {
                expires: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Freshness::default()
            },
        })
    };
    if gated {
        ScriptedClient::gated(script)
    } else {
        ScriptedClient::new(script)
    }
}

fn style() -> Arc<Style> {
    Arc::new(
        Style::new(vec![
            BucketRule::new("ocean", BucketKind::Fill, "water")
                .with_filter(Filter::eq("class", "ocean")),
            BucketRule::new("all-water", BucketKind::Line, "water"),
            BucketRule::new("deep-only", BucketKind::Fill, "water").with_min_zoom(10.0),
        ])
        .unwrap(),
    )
}

fn new_tile(harness: &Harness, id: TileId) -> Arc<TileData> {
    TileData::new(id, TEMPLATE, style(), common::as_file_source(&harness.source))
}

fn request_on_loop(harness: &Harness, tile: &Arc<TileData>) -> bool {
    let tile = Arc::clone(tile);
    harness.handle().call(move || tile.request()).unwrap()
}

#[test]
fn test_tile_fetch_parse_lifecycle() {
    let harness = Harness::new(water_client(false));
    let tile = new_tile(&harness, TileId::new(4, 3, 5));

    assert!(request_on_loop(&harness, &tile));
    wait_until(|| tile.state() == TileState::Loaded);

    assert!(tile.parse());
    assert_eq!(tile.state(), TileState::Parsed);
    assert!(!tile.has_data());

    let buckets = tile.buckets();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets["ocean"].features.len(), 1);
    assert_eq!(buckets["all-water"].features.len(), 2);
    assert!(tile.bucket("deep-only").is_none());
    assert_eq!(harness.client.calls()[0].0, "https://tiles.example.com/4/3/5.pbf");
}

#[test]
fn test_same_tile_twice_fetches_once() {
    let harness = Harness::new(water_client(true));
    let a = new_tile(&harness, TileId::new(2, 1, 1));
    let b = new_tile(&harness, TileId::new(2, 1, 1));

    request_on_loop(&harness, &a);
    request_on_loop(&harness, &b);
    harness.client.open(1);

    wait_until(|| a.state() == TileState::Loaded && b.state() == TileState::Loaded);
    assert_eq!(harness.client.call_count(), 1);
}

#[test]
fn test_canceled_tile_ignores_late_bytes() {
    let harness = Harness::new(water_client(true));
    let tile = new_tile(&harness, TileId::new(2, 1, 1));

    request_on_loop(&harness, &tile);
    // Cancel from the test thread, not the loop.
    tile.cancel();
    harness.client.open(1);
    harness.wait_idle();

    assert_eq!(tile.state(), TileState::Obsolete);
    assert!(!tile.has_data());
    assert!(!tile.parse());
}

#[test]
fn test_evicted_tile_is_released() {
    let harness = Harness::new(water_client(true));
    let tile = new_tile(&harness, TileId::new(2, 1, 1));
    request_on_loop(&harness, &tile);

    let weak = Arc::downgrade(&tile);
    drop(tile);
    assert!(weak.upgrade().is_none());

    harness.client.open(1);
    harness.wait_idle();
}

#[test]
fn test_failed_fetch_makes_tile_obsolete() {
    let client = ScriptedClient::new(|url, _| {
        Err(FetchError::Status {
            url: url.to_string(),
            status: 500,
        })
    });
    let harness = Harness::new(client);
    let tile = new_tile(&harness, TileId::new(1, 0, 0));

    request_on_loop(&harness, &tile);
    wait_until(|| tile.state() == TileState::Obsolete);
    assert!(!tile.parse());
}

#[test]
fn test_garbage_payload_makes_tile_obsolete() {
    // Layer length varint that never terminates.
    let client = ScriptedClient::serving(&[
        0x1a, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01,
    ]);
    let harness = Harness::new(client);
    let tile = new_tile(&harness, TileId::new(1, 0, 0));

    request_on_loop(&harness, &tile);
    wait_until(|| tile.state() == TileState::Loaded);
    assert!(!tile.parse());
    assert_eq!(tile.state(), TileState::Obsolete);
}

#[test]
fn test_cached_tile_loads_without_network() {
    let harness = Harness::new(water_client(false));
    let first = new_tile(&harness, TileId::new(3, 0, 7));
    request_on_loop(&harness, &first);
    wait_until(|| first.state() == TileState::Loaded);

    let second = new_tile(&harness, TileId::new(3, 0, 7));
    request_on_loop(&harness, &second);
    wait_until(|| second.state() == TileState::Loaded);
    assert!(second.parse());
    assert_eq!(harness.client.call_count(), 1);
}

#[test]
fn test_invalid_tile_never_fetches() {
    let harness = Harness::new(water_client(false));
    let tile = new_tile(&harness, TileId::new(3, 8, 0));

    assert_eq!(tile.state(), TileState::Invalid);
    assert!(!request_on_loop(&harness, &tile));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(harness.client.call_count(), 0);
}
