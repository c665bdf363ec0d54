// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rider_ledger::{
    AdminContext, AdminQueryService, DeliveryCompleted, Engine, EngineConfig, LedgerError, Money,
    OrderCompletionIngestor, OrderId, RiderId,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Actor recorded on settlements replayed from a file.
const REPLAY_ACTOR: &str = "csv-replay";

#[derive(Parser, Debug)]
#[command(name = "rider-ledger")]
#[command(about = "Replays rider delivery and settlement events and reports ledger balances", long_about = None)]
struct Args {
    /// Path to CSV file with ledger events
    ///
    /// Expected format: type,rider,order,amount,fee,cod,earnings
    /// Types: delivery, settle, block, unblock
    /// Example: cargo run -- events.csv > riders.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML configuration (thresholds, bonus rule, fee schedule)
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Print fleet totals instead of per-rider summaries
    #[arg(long)]
    fleet: bool,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match replay_events(Engine::with_config(config), BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    let result = if args.fleet {
        write_fleet(&engine, std::io::stdout())
    } else {
        write_riders(&engine, std::io::stdout())
    };
    if let Err(e) = result {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays clean CSV. Filter with `RIDER_LEDGER_LOG`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("RIDER_LEDGER_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event_type: String,
    rider: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    order: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Money>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    fee: Option<Money>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    cod: Option<bool>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    earnings: Option<Money>,
}

#[derive(Debug)]
enum Command {
    Delivery(DeliveryCompleted),
    Settle {
        rider_id: RiderId,
        amount_collected: Money,
        earnings_paid: Money,
    },
    SetBlocked {
        rider_id: RiderId,
        blocked: bool,
    },
}

impl CsvRecord {
    /// Converts a CSV record to a ledger command.
    ///
    /// Returns `None` for unknown types or missing required fields.
    fn into_command(self, config: &EngineConfig) -> Option<Command> {
        let rider_id = RiderId(self.rider);

        match self.event_type.to_lowercase().as_str() {
            "delivery" => Some(Command::Delivery(DeliveryCompleted {
                order_id: OrderId(self.order?),
                rider_id,
                order_total: self.amount?,
                commission_rate: config.fees.default_commission_rate,
                is_cod: self.cod.unwrap_or(true),
                delivery_fee: self.fee,
            })),
            "settle" => Some(Command::Settle {
                rider_id,
                amount_collected: self.amount.unwrap_or(0),
                earnings_paid: self.earnings.unwrap_or(0),
            }),
            "block" => Some(Command::SetBlocked {
                rider_id,
                blocked: true,
            }),
            "unblock" => Some(Command::SetBlocked {
                rider_id,
                blocked: false,
            }),
            _ => None,
        }
    }
}

fn apply(engine: &Arc<Engine>, ingestor: &OrderCompletionIngestor, command: Command) -> Result<(), LedgerError> {
    let ctx = AdminContext::new(REPLAY_ACTOR);
    match command {
        Command::Delivery(event) => ingestor.on_order_delivered(&event).map(|_| ()),
        Command::Settle {
            rider_id,
            amount_collected,
            earnings_paid,
        } => engine
            .settle(rider_id, amount_collected, earnings_paid, &ctx)
            .map(|_| ()),
        Command::SetBlocked { rider_id, blocked } => {
            engine.set_blocked(rider_id, blocked, &ctx).map(|_| ())
        }
    }
}

pub fn replay_events<R: Read>(engine: Engine, reader: R) -> Result<Arc<Engine>, csv::Error> {
    let engine = Arc::new(engine);
    let ingestor = OrderCompletionIngestor::new(Arc::clone(&engine));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " delivery "
        .flexible(true) // Allow trailing optional fields to be omitted
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => {
                let Some(command) = record.into_command(engine.config()) else {
                    warn!(line = line + 2, "skipping invalid event record");
                    continue;
                };

                // Rejected commands leave the ledger untouched; keep going.
                debug!(?command, "applying");
                if let Err(e) = apply(&engine, &ingestor, command) {
                    warn!(line = line + 2, error = %e, "skipping rejected event");
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed row");
                continue;
            }
        }
    }

    Ok(engine)
}

pub fn write_riders<W: Write>(engine: &Arc<Engine>, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let query = AdminQueryService::new(Arc::clone(engine));

    for summary in query.rider_summaries() {
        wtr.serialize(&summary)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_fleet<W: Write>(engine: &Arc<Engine>, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let query = AdminQueryService::new(Arc::clone(engine));
    wtr.serialize(query.fleet_totals())?;
    wtr.flush()?;
    Ok(())
}
