//! `eidbridge` demo binary.
//!
//! Runs one command against mock card readers with an auto-responding
//! console UI and prints the outcome as JSON on stdout. Logs go to stderr
//! (`RUST_LOG`, default `info`).
//!
//! ```text
//! eidbridge --command '{"command":"authenticate","arguments":{"origin":"https://ria.ee",
//!     "challengeNonce":"12345678123456781234567812345678912356789123"}}' --pin 1234
//! ```

mod console_ui;

use std::io::{self, Read};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use eidbridge_card::ReaderInfo;
use eidbridge_card::mock::{MockCard, MockReaders};
use eidbridge_controller::{CardDiscovery, Controller, ControllerConfig, Outcome, RunMode};
use eidbridge_core::{Command, VERSION};

use console_ui::{ConsoleScript, ConsoleUi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Interactive,
    Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Discovery {
    Synchronous,
    EventDriven,
}

#[derive(Parser, Debug)]
#[command(name = "eidbridge", version, about = "Run an eID command against mock card readers")]
struct Cli {
    /// Command JSON; read from stdin when omitted
    #[arg(long)]
    command: Option<String>,

    /// PIN to enter; repeat to answer wrong-PIN prompts
    #[arg(long)]
    pin: Vec<String>,

    /// Card index to pick when several cards match
    #[arg(long, default_value_t = 0)]
    select: usize,

    /// Cancel at the certificate confirmation
    #[arg(long)]
    cancel: bool,

    /// Retry after retriable errors
    #[arg(long)]
    retry: bool,

    #[arg(long, value_enum, default_value_t = Mode::Interactive)]
    mode: Mode,

    /// Card discovery strategy (default depends on the mode)
    #[arg(long, value_enum)]
    discovery: Option<Discovery>,

    /// Retries allowed before the run fails
    #[arg(long)]
    max_retries: Option<u32>,

    /// Number of mock cards to insert
    #[arg(long, default_value_t = 1)]
    cards: usize,

    /// Give the mock readers a PIN-pad
    #[arg(long)]
    pin_pad: bool,

    /// Use an expired signing certificate on the mock cards
    #[arg(long)]
    expired: bool,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default().with_mode(match self.mode {
            Mode::Interactive => RunMode::Interactive,
            Mode::Pipe => RunMode::Pipe,
        });
        if let Some(discovery) = self.discovery {
            config = config.with_discovery(match discovery {
                Discovery::Synchronous => CardDiscovery::Synchronous,
                Discovery::EventDriven => CardDiscovery::EventDriven,
            });
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        config
    }

    fn script(&self) -> ConsoleScript {
        ConsoleScript {
            select: self.select,
            pins: self.pin.clone(),
            cancel: self.cancel,
            retry: self.retry,
        }
    }

    fn read_command(&self) -> Result<String> {
        match &self.command {
            Some(command) => Ok(command.clone()),
            None => {
                let mut input = String::new();
                io::stdin()
                    .read_to_string(&mut input)
                    .context("Failed to read command from stdin")?;
                Ok(input)
            }
        }
    }
}

fn mock_readers(cli: &Cli) -> MockReaders {
    let (readers, handle) = MockReaders::new();
    for index in 0..cli.cards {
        let mut reader = ReaderInfo::new(format!("Mock Reader {}", index));
        if cli.pin_pad {
            reader = reader.with_pin_pad();
        }
        let mut card = MockCard::esteid();
        if cli.expired {
            card = card.with_expired_signing_certificate();
        }
        handle.insert_card(reader, Arc::new(card));
    }
    debug!("Inserted {} mock cards", handle.card_count());
    readers
}

fn exit_status(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Success(_) => 0,
        Outcome::Cancelled => 1,
        Outcome::ArgumentError(_) => 2,
        Outcome::CriticalFailure(_) => 3,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("eidbridge {}", VERSION);

    let outcome = match Command::from_json(&cli.read_command()?) {
        Ok(command) => {
            let config = cli.controller_config();
            config.validate().context("Invalid controller configuration")?;

            let mut controller = Controller::new(
                command,
                Arc::new(ConsoleUi::new(cli.script())),
                Arc::new(mock_readers(&cli)),
                config,
            );
            controller.run().await
        }
        Err(error) => Outcome::ArgumentError(error.to_string()),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
    );
    Ok(ExitCode::from(exit_status(&outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("eidbridge").chain(args.iter().copied())).unwrap()
    }

    #[rstest]
    #[case(&[], CardDiscovery::EventDriven)]
    #[case(&["--mode", "pipe"], CardDiscovery::Synchronous)]
    #[case(&["--mode", "pipe", "--discovery", "event-driven"], CardDiscovery::EventDriven)]
    #[case(&["--discovery", "synchronous"], CardDiscovery::Synchronous)]
    fn test_discovery_from_flags(#[case] args: &[&str], #[case] expected: CardDiscovery) {
        assert_eq!(parse(args).controller_config().discovery(), expected);
    }

    #[test]
    fn test_script_from_flags() {
        let cli = parse(&["--pin", "0000", "--pin", "1234", "--select", "1", "--retry"]);
        let script = cli.script();

        assert_eq!(script.pins, vec!["0000", "1234"]);
        assert_eq!(script.select, 1);
        assert!(script.retry);
        assert!(!script.cancel);
    }

    #[test]
    fn test_max_retries_override() {
        assert_eq!(parse(&["--max-retries", "0"]).controller_config().max_retries, 0);
        assert_eq!(
            parse(&[]).controller_config().max_retries,
            ControllerConfig::default().max_retries
        );
    }

    #[test]
    fn test_mock_readers() {
        use eidbridge_card::CardMonitor;

        let cli = parse(&["--cards", "2", "--pin-pad"]);
        let cards = mock_readers(&cli).available_cards().unwrap();

        assert_eq!(cards.len(), 2);
        assert!(cards.iter().all(|card| card.reader().has_pin_pad));
    }

    #[rstest]
    #[case(Outcome::Cancelled, 1)]
    #[case(Outcome::ArgumentError("bad".into()), 2)]
    #[case(Outcome::CriticalFailure("boom".into()), 3)]
    fn test_exit_status(#[case] outcome: Outcome, #[case] expected: u8) {
        assert_eq!(exit_status(&outcome), expected);
    }
}
