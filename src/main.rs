mod api_client;
mod config;
mod error;
mod normalize;
mod publish;
mod rollup;
mod row;
mod runner;
mod store;
mod token;
mod window;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::error;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Report,
}

#[derive(Subcommand)]
enum Report {
    /// Fetch paid country-level campaign metrics, merge them into the
    /// historical store and publish the results.
    Paid {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,
    },
    /// Fetch organic account and pin metrics and merge them into the
    /// historical stores.
    Organic {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    let result = match &args.command {
        Report::Paid { start, end } => runner::run_paid_report(args.config, start, end).await,
        Report::Organic { start, end } => {
            runner::run_organic_report(args.config, start, end).await
        }
    };

    if let Err(err) = result {
        error!("report run failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
