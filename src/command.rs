//! Command handling: parse → fetch → correlate → aggregate → format → dispatch.
//!
//! Each invocation runs the pipeline once and stops at the first terminal
//! state. Usage and fetch errors are answered with a single message;
//! report chunks are sent strictly in order and sending stops at the first
//! failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{AgencyFeeds, Config};
use crate::correlate::correlate;
use crate::error::{CommandError, FetchError, SendError};
use crate::fetch::{FeedClient, FeedSource};
use crate::output::{
    format_chunks_with_header, locations_header, no_records_message, render_location,
    render_trip_count,
};
use crate::stats::TripStats;

/// The outbound send primitive of the chat platform.
#[async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), SendError>;
}

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Per-trip current stop report for an agency.
    Schedule { agency_id: String },
    /// Count of trains currently on a trip.
    Trains { agency_id: String },
    Help,
}

pub const SCHEDULE_USAGE: &str = "Usage: !schedule <agency_id>";
pub const TRAINS_USAGE: &str = "Usage: !trains <agency_id>";

impl Command {
    /// Validates a command name (with or without the `!` prefix) and its
    /// arguments. Extra arguments after the agency id are ignored.
    pub fn parse(name: &str, args: &[String]) -> Result<Self, CommandError> {
        let name = name.strip_prefix('!').unwrap_or(name);
        let agency = args.first().map(|a| a.trim()).filter(|a| !a.is_empty());

        match (name.to_ascii_lowercase().as_str(), agency) {
            ("schedule", Some(a)) => Ok(Command::Schedule {
                agency_id: a.to_string(),
            }),
            ("schedule", None) => Err(CommandError::InvalidCommand(SCHEDULE_USAGE.into())),
            ("trains", Some(a)) => Ok(Command::Trains {
                agency_id: a.to_string(),
            }),
            ("trains", None) => Err(CommandError::InvalidCommand(TRAINS_USAGE.into())),
            ("help", _) => Ok(Command::Help),
            (other, _) => Err(CommandError::InvalidCommand(format!(
                "Unknown command '{other}'. {SCHEDULE_USAGE} or {TRAINS_USAGE}"
            ))),
        }
    }

    /// The report this command asks for and its agency, or `None` for help.
    pub fn report(&self) -> Option<(Report, &str)> {
        match self {
            Command::Schedule { agency_id } => Some((Report::Locations, agency_id)),
            Command::Trains { agency_id } => Some((Report::TripCount, agency_id)),
            Command::Help => None,
        }
    }
}

/// Report kinds produced from fetched feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Locations,
    TripCount,
}

/// Pipeline stage, recorded in logs as an invocation advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parsed,
    Fetching,
    Correlating,
    Aggregating,
    Formatting,
    Dispatched,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Parsed => "parsed",
            Stage::Fetching => "fetching",
            Stage::Correlating => "correlating",
            Stage::Aggregating => "aggregating",
            Stage::Formatting => "formatting",
            Stage::Dispatched => "dispatched",
        };
        f.write_str(s)
    }
}

/// What a successful invocation delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Report chunks, all sent.
    Report { chunks: usize },
    /// Nothing to report; the informational message was sent.
    Empty,
    Help,
}

/// Chunks ready for dispatch.
struct Rendered {
    chunks: Vec<String>,
    empty: bool,
}

pub struct CommandHandler<S> {
    client: FeedClient<S>,
    config: Arc<Config>,
}

impl<S: FeedSource> CommandHandler<S> {
    pub fn new(client: FeedClient<S>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    pub async fn handle(
        &self,
        name: &str,
        args: &[String],
        sender: &dyn ChunkSender,
    ) -> Result<Delivery, CommandError> {
        self.handle_until(name, args, sender, std::future::pending::<()>())
            .await
    }

    /// Runs one invocation, abandoning it as soon as `cancelled` resolves.
    ///
    /// A cancelled invocation sends nothing further; fetches in flight are
    /// dropped.
    #[tracing::instrument(skip_all, fields(command = name))]
    pub async fn handle_until<C>(
        &self,
        name: &str,
        args: &[String],
        sender: &dyn ChunkSender,
        cancelled: C,
    ) -> Result<Delivery, CommandError>
    where
        C: Future<Output = ()> + Send,
    {
        tokio::pin!(cancelled);

        let command = match Command::parse(name, args) {
            Ok(command) => command,
            Err(e) => {
                if let CommandError::InvalidCommand(usage) = &e {
                    reply(sender, usage).await;
                }
                return Err(e);
            }
        };

        let Some((report, agency_id)) = command.report() else {
            reply(sender, &self.help_text()).await;
            return Ok(Delivery::Help);
        };
        let feeds = match self.config.agency(agency_id) {
            Some(feeds) => feeds,
            None => {
                let usage = format!(
                    "Unknown agency '{agency_id}'. Known agencies: {}",
                    self.agency_list()
                );
                reply(sender, &usage).await;
                return Err(CommandError::InvalidCommand(usage));
            }
        };
        debug!(stage = %Stage::Parsed, ?command, "Command accepted");

        let rendered = tokio::select! {
            biased;
            _ = &mut cancelled => {
                info!("Invocation cancelled while fetching");
                return Err(CommandError::Cancelled);
            }
            r = self.render(report, agency_id, feeds) => r,
        };

        let rendered = match rendered {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Feed fetch failed");
                reply(
                    sender,
                    &format!("Error fetching GTFS data ({}): {}", e.kind.reported(), e.message),
                )
                .await;
                return Err(e.into());
            }
        };

        let total = rendered.chunks.len();
        for (index, chunk) in rendered.chunks.iter().enumerate() {
            let sent = tokio::select! {
                biased;
                _ = &mut cancelled => {
                    info!(delivered = index, total, "Invocation cancelled while sending");
                    return Err(CommandError::Cancelled);
                }
                r = sender.send(chunk) => r,
            };

            if let Err(source) = sent {
                warn!(index, total, error = %source, "Chunk send failed, stopping");
                return Err(CommandError::Send {
                    index,
                    total,
                    delivered: index,
                    source,
                });
            }
        }
        debug!(stage = %Stage::Dispatched, chunks = total, "Response delivered");

        if rendered.empty {
            Ok(Delivery::Empty)
        } else {
            Ok(Delivery::Report { chunks: total })
        }
    }

    async fn render(
        &self,
        report: Report,
        agency_id: &str,
        feeds: &AgencyFeeds,
    ) -> Result<Rendered, FetchError> {
        match report {
            Report::Locations => self.render_locations(agency_id, feeds).await,
            Report::TripCount => self.render_trip_count(agency_id, feeds).await,
        }
    }

    async fn render_locations(
        &self,
        agency_id: &str,
        feeds: &AgencyFeeds,
    ) -> Result<Rendered, FetchError> {
        debug!(stage = %Stage::Fetching, "Fetching static and real-time feeds");
        let (schedule, realtime) = self.client.fetch_both(feeds).await;
        let realtime = realtime?;
        let schedule = match schedule {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "Static schedule unavailable, reporting without it");
                None
            }
        };

        debug!(stage = %Stage::Correlating, trips = realtime.updates.len());
        let locations = correlate(schedule.as_ref(), &realtime.updates);

        debug!(stage = %Stage::Aggregating);
        let stats = TripStats::from_updates(&realtime.updates);
        info!(
            total_trips = stats.total_trips,
            on_trip = stats.on_trip,
            stop_coverage_pct = stats.stop_coverage_pct(),
            "Real-time trips correlated"
        );

        debug!(stage = %Stage::Formatting);
        let chunks = format_chunks_with_header(
            &locations_header(agency_id, realtime.timestamp),
            &locations,
            render_location,
            self.config.max_chunk_size,
        );

        Ok(non_empty(chunks, agency_id))
    }

    async fn render_trip_count(
        &self,
        agency_id: &str,
        feeds: &AgencyFeeds,
    ) -> Result<Rendered, FetchError> {
        // Only real-time data is needed; the static fetch is skipped.
        debug!(stage = %Stage::Fetching, "Fetching real-time feed");
        let realtime = self.client.fetch_realtime(&feeds.realtime_url).await?;

        debug!(stage = %Stage::Aggregating);
        let stats = TripStats::from_updates(&realtime.updates);
        info!(
            total_trips = stats.total_trips,
            on_trip = stats.on_trip,
            "Trip count computed"
        );

        debug!(stage = %Stage::Formatting);
        let chunks = if stats.total_trips == 0 {
            Vec::new()
        } else {
            vec![render_trip_count(agency_id, &stats)]
        };

        Ok(non_empty(chunks, agency_id))
    }

    fn agency_list(&self) -> String {
        let agencies: Vec<&str> = self.config.agencies.keys().map(String::as_str).collect();
        agencies.join(", ")
    }

    fn help_text(&self) -> String {
        format!(
            "{SCHEDULE_USAGE}\n{TRAINS_USAGE}\nKnown agencies: {}",
            self.agency_list()
        )
    }
}

/// Substitutes the informational message when there is nothing to report.
fn non_empty(chunks: Vec<String>, agency_id: &str) -> Rendered {
    if chunks.is_empty() {
        Rendered {
            chunks: vec![no_records_message(agency_id)],
            empty: true,
        }
    } else {
        Rendered {
            chunks,
            empty: false,
        }
    }
}

/// Sends a one-off reply (usage, help, error). Failures are only logged
/// since the invocation is already ending.
async fn reply(sender: &dyn ChunkSender, text: &str) {
    if let Err(e) = sender.send(text).await {
        warn!(error = %e, "Failed to send reply");
    }
}
