// src/main.rs

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;

use cli::{Cli, Commands, LedgerCommands};

/// Process exit code for an error: the first `capsule::Error` in the chain
/// decides, anything else is a generic failure
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<capsule::Error>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
        .clamp(1, 255) as u8
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        1 => tracing_subscriber::EnvFilter::new("info"),
        _ => tracing_subscriber::EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<()> {
    // `meta` and `keygen` work without any configuration
    match &cli.command {
        Commands::Meta { capsule } => return commands::cmd_meta(capsule),
        Commands::Keygen {
            output,
            key_id,
            force,
        } => return commands::cmd_keygen(output, key_id.as_deref(), *force),
        _ => {}
    }

    let config = capsule::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            capsule,
            out_dir,
            trust,
            timeout,
        } => commands::cmd_run(&config, &capsule, &out_dir, &trust, timeout),
        Commands::Verify {
            capsule,
            trust,
            json,
        } => commands::cmd_verify(&config, &capsule, &trust, json),
        Commands::Mint {
            payload,
            title,
            purpose,
            entry_kind,
            id,
            session,
            manifest_hash,
            provenance,
            output,
            mint,
        } => commands::cmd_mint(
            &config,
            &payload,
            &title,
            &purpose,
            &entry_kind,
            id.as_deref(),
            session.as_deref(),
            manifest_hash.as_deref(),
            &provenance,
            output.as_deref(),
            &mint,
        ),
        Commands::MintBatch {
            batch,
            output,
            mint,
        } => commands::cmd_mint_batch(&config, &batch, &output, &mint),
        Commands::Ledger(cmd) => match cmd {
            LedgerCommands::Show { ledger, json } => {
                commands::cmd_ledger_show(&config, ledger.as_deref(), json)
            }
            LedgerCommands::Verify { ledger } => {
                commands::cmd_ledger_verify(&config, ledger.as_deref())
            }
            LedgerCommands::Tip { ledger } => commands::cmd_ledger_tip(&config, ledger.as_deref()),
            LedgerCommands::Check {
                capsule,
                trust,
                ledger,
            } => commands::cmd_ledger_check(&config, &capsule, &trust, ledger.as_deref()),
        },
        Commands::Meta { .. } | Commands::Keygen { .. } => Ok(()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}
