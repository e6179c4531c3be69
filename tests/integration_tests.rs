use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gtfs_rt_reporter::command::{ChunkSender, CommandHandler, Delivery};
use gtfs_rt_reporter::config::{AgencyFeeds, Config};
use gtfs_rt_reporter::correlate::{StopRef, correlate};
use gtfs_rt_reporter::error::{CommandError, FetchError, SendError};
use gtfs_rt_reporter::fetch::{FeedCache, FeedClient, FeedSource};
use gtfs_rt_reporter::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate, VehiclePosition,
};
use gtfs_rt_reporter::parser::parse_realtime;
use gtfs_rt_reporter::schedule::StaticSchedule;
use gtfs_rt_reporter::stats::count_on_trip;
use prost::Message;

const STATIC_URL: &str = "http://bart.test/google_transit.zip";
const RT_URL: &str = "http://bart.test/tripupdate.aspx";

struct FixtureSource {
    bodies: HashMap<&'static str, Bytes>,
    calls: AtomicUsize,
}

impl FixtureSource {
    fn new(bodies: &[(&'static str, Vec<u8>)]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, body)| (*url, Bytes::from(body.clone())))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FeedSource for FixtureSource {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::network(url, "HTTP status 503 Service Unavailable"))
    }
}

#[derive(Default)]
struct ChannelSender {
    sent: Mutex<Vec<String>>,
    fail_on: Option<usize>,
    attempts: AtomicUsize,
}

#[async_trait]
impl ChunkSender for ChannelSender {
    async fn send(&self, text: &str) -> Result<(), SendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(attempt) {
            return Err(SendError("403 Missing Permissions".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn gtfs_zip() -> Vec<u8> {
    let files = [
        (
            "routes.txt",
            "route_id,agency_id,route_short_name,route_long_name\nYellow-S,BART,YL-S,Antioch to SFO\n",
        ),
        (
            "trips.txt",
            "route_id,service_id,trip_id,trip_headsign\nYellow-S,WKDY,1561112,SFO\nYellow-S,WKDY,1561113,SFO\n",
        ),
        ("stops.txt", "stop_id,stop_name\nMONT,Montgomery St\nPOWL,Powell St\n"),
    ];
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Trip updates for every `(trip, stop)`; a stop of `None` has no vehicle position.
fn realtime_feed(trips: &[(&str, Option<&str>)]) -> Vec<u8> {
    let mut entity = Vec::new();
    for (i, (trip_id, stop)) in trips.iter().enumerate() {
        let trip = TripDescriptor {
            trip_id: Some(trip_id.to_string()),
            ..Default::default()
        };
        entity.push(FeedEntity {
            id: format!("tu-{i}"),
            trip_update: Some(TripUpdate {
                trip: trip.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        if let Some(stop) = stop {
            entity.push(FeedEntity {
                id: format!("vp-{i}"),
                vehicle: Some(VehiclePosition {
                    trip: Some(trip),
                    stop_id: Some(stop.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_700_000_000),
            incrementality: None,
            feed_version: None,
        },
        entity,
    }
    .encode_to_vec()
}

fn config(max_chunk_size: usize) -> Arc<Config> {
    Arc::new(Config {
        agencies: BTreeMap::from([(
            "bart".to_string(),
            AgencyFeeds {
                static_url: STATIC_URL.into(),
                realtime_url: RT_URL.into(),
            },
        )]),
        max_chunk_size,
        ..Default::default()
    })
}

fn args() -> Vec<String> {
    vec!["bart".to_string()]
}

#[test]
fn test_parse_and_correlate_pipeline() {
    let schedule = StaticSchedule::from_zip_bytes(&gtfs_zip()).expect("Failed to parse schedule");
    let feed = parse_realtime(&realtime_feed(&[
        ("1561112", Some("MONT")),
        ("1561113", None),
        ("9999999", Some("")),
    ]))
    .expect("Failed to parse feed");

    let locations = correlate(Some(&schedule), &feed.updates);

    assert_eq!(locations.len(), 3);
    assert_eq!(locations[0].stop, StopRef::Known("MONT".into()));
    assert_eq!(locations[0].stop_name.as_deref(), Some("Montgomery St"));
    assert_eq!(locations[0].route_name.as_deref(), Some("YL-S"));
    assert_eq!(locations[1].stop, StopRef::Unknown);
    assert_eq!(locations[1].route_id.as_deref(), Some("Yellow-S"));
    // A reported but empty stop id is still a position.
    assert_eq!(locations[2].stop, StopRef::Known(String::new()));
    assert_ne!(locations[2].stop, locations[1].stop);
    assert_eq!(locations[2].route_id, None);

    assert_eq!(count_on_trip(&feed.updates), 2);
}

#[tokio::test]
async fn test_schedule_command_end_to_end() {
    let source = FixtureSource::new(&[
        (STATIC_URL, gtfs_zip()),
        (RT_URL, realtime_feed(&[("1561112", Some("MONT")), ("1561113", Some("POWL"))])),
    ]);
    let handler = CommandHandler::new(FeedClient::new(source, Duration::from_secs(2)), config(1900));
    let sender = ChannelSender::default();

    let delivery = handler.handle("!schedule", &args(), &sender).await.unwrap();

    assert_eq!(delivery, Delivery::Report { chunks: 1 });
    let sent = sender.sent.lock().unwrap();
    assert_eq!(
        sent[0],
        "Current train locations for agency bart (as of 2023-11-14 22:13:20 UTC):\n\
         Train 1561112 (YL-S) is currently at stop MONT (Montgomery St)\n\
         Train 1561113 (YL-S) is currently at stop POWL (Powell St)\n"
    );
}

#[tokio::test]
async fn test_static_outage_still_reports_locations() {
    let source = FixtureSource::new(&[(RT_URL, realtime_feed(&[("1561112", Some("MONT"))]))]);
    let handler = CommandHandler::new(FeedClient::new(source, Duration::from_secs(2)), config(1900));
    let sender = ChannelSender::default();

    let delivery = handler.handle("!schedule", &args(), &sender).await.unwrap();

    assert_eq!(delivery, Delivery::Report { chunks: 1 });
    assert!(sender.sent.lock().unwrap()[0].contains("Train 1561112 is currently at stop MONT\n"));
}

#[tokio::test]
async fn test_large_report_is_chunked_in_order() {
    let trips: Vec<String> = (0..200).map(|i| format!("trip-{i:04}")).collect();
    let pairs: Vec<(&str, Option<&str>)> = trips.iter().map(|t| (t.as_str(), Some("MONT"))).collect();
    let source = FixtureSource::new(&[(RT_URL, realtime_feed(&pairs))]);
    let handler = CommandHandler::new(FeedClient::new(source, Duration::from_secs(2)), config(500));
    let sender = ChannelSender::default();

    let delivery = handler.handle("!schedule", &args(), &sender).await.unwrap();

    let sent = sender.sent.lock().unwrap();
    assert_eq!(delivery, Delivery::Report { chunks: sent.len() });
    assert!(sent.len() > 1);
    assert!(sent.iter().all(|chunk| chunk.len() <= 500));

    let lines: Vec<&str> = sent.iter().flat_map(|c| c.lines()).skip(1).collect();
    assert_eq!(lines.len(), 200);
    for (line, trip) in lines.iter().zip(&trips) {
        assert_eq!(*line, format!("Train {trip} is currently at stop MONT"));
    }
}

#[tokio::test]
async fn test_send_failure_mid_batch() {
    let source = FixtureSource::new(&[(RT_URL, realtime_feed(&[("a", None), ("b", None)]))]);
    let handler = CommandHandler::new(FeedClient::new(source, Duration::from_secs(2)), config(1));
    let sender = ChannelSender {
        fail_on: Some(1),
        ..Default::default()
    };

    let err = handler.handle("!schedule", &args(), &sender).await.unwrap_err();

    assert!(matches!(
        err,
        CommandError::Send {
            index: 1,
            total: 3,
            delivered: 1,
            ..
        }
    ));
    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("Current train locations"));
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_invocations_share_cached_fetch() {
    let source = Arc::new(FixtureSource::new(&[(
        RT_URL,
        realtime_feed(&[("1561112", Some("MONT"))]),
    )]));
    let cache = Arc::new(FeedCache::new(Duration::from_secs(30)));
    let handler = Arc::new(CommandHandler::new(
        FeedClient::new(source.clone(), Duration::from_secs(2)).with_cache(cache),
        config(1900),
    ));

    let mut tasks = vec![];
    for _ in 0..5 {
        let handler = handler.clone();
        tasks.push(tokio::spawn(async move {
            let sender = ChannelSender::default();
            let delivery = handler.handle("!trains", &args(), &sender).await.unwrap();
            let sent = sender.sent.lock().unwrap().clone();
            (delivery, sent)
        }));
    }

    for task in tasks {
        let (delivery, sent) = task.await.unwrap();
        assert_eq!(delivery, Delivery::Report { chunks: 1 });
        assert_eq!(
            sent,
            vec!["The current number of trains for bart:\nThere is 1 train currently on a trip (1 trip in the feed).".to_string()]
        );
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}
