// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: capsule file path
fn capsule_arg() -> Arg {
    Arg::new("capsule").required(true).help("Path to the capsule file")
}

/// Common argument: ledger file
fn ledger_arg() -> Arg {
    Arg::new("ledger")
        .long("ledger")
        .value_name("PATH")
        .help("Ledger file (default: ledger from config)")
}

/// Common arguments: extra trusted keys
fn trust_args() -> [Arg; 2] {
    [
        Arg::new("trust")
            .long("trust")
            .value_name("KEY")
            .action(clap::ArgAction::Append)
            .help("Trust a base64 Ed25519 public key (repeatable)"),
        Arg::new("trust_file")
            .long("trust-file")
            .value_name("PATH")
            .action(clap::ArgAction::Append)
            .help("Trust the public key in a key file (repeatable)"),
    ]
}

/// Common argument: signing key
fn key_arg() -> Arg {
    Arg::new("key")
        .long("key")
        .value_name("PATH")
        .help("Private key file (default: signing_key from config)")
}

fn build_cli() -> Command {
    Command::new("capsule")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signed, self-verifying executable capsules with a hash-chained ledger")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .subcommand(
            Command::new("run")
                .about("Verify a capsule, then execute its payload with OUT_DIR as argument")
                .arg(capsule_arg())
                .arg(Arg::new("out_dir").default_value(".").help("Directory passed to the payload"))
                .args(trust_args())
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .help("Kill the payload after this many seconds"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a capsule's signature and hashes without running it")
                .arg(capsule_arg())
                .args(trust_args())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(clap::ArgAction::SetTrue)
                        .help("Print the result as JSON"),
                ),
        )
        .subcommand(
            Command::new("meta")
                .about("Print a capsule's metadata as JSON (unverified, informational only)")
                .arg(capsule_arg()),
        )
        .subcommand(
            Command::new("mint")
                .about("Mint a capsule from a payload file and record it in the ledger")
                .arg(Arg::new("payload").required(true).help("Payload file to embed"))
                .arg(Arg::new("title").long("title").required(true).help("Capsule title"))
                .arg(Arg::new("purpose").long("purpose").required(true).help("What the payload does"))
                .arg(
                    Arg::new("entry_kind")
                        .long("entry-kind")
                        .default_value("sh")
                        .help("How the payload is launched: exec, or an interpreter name"),
                )
                .arg(Arg::new("id").long("id").help("Capsule id (default: random UUID)"))
                .arg(Arg::new("session").long("session").help("Session id (default: random UUID)"))
                .arg(
                    Arg::new("manifest_hash")
                        .long("manifest-hash")
                        .help("Digest of the batch manifest this capsule belongs to"),
                )
                .arg(
                    Arg::new("prov")
                        .long("prov")
                        .value_name("KEY=VALUE")
                        .action(clap::ArgAction::Append)
                        .help("Extra provenance entry (repeatable)"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output file (default: <capsule_id>.capsule)"),
                )
                .arg(key_arg())
                .arg(ledger_arg()),
        )
        .subcommand(
            Command::new("mint-batch")
                .about("Mint every capsule listed in a batch file as one session")
                .arg(Arg::new("batch").required(true).help("Batch file (TOML)"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value(".")
                        .help("Output directory for capsules and the manifest"),
                )
                .arg(key_arg())
                .arg(ledger_arg()),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate an Ed25519 signing key pair")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("capsule-signing")
                        .help("Output path base (creates .private and .public files)"),
                )
                .arg(Arg::new("key_id").long("key-id").help("Key identifier recorded in signatures"))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Overwrite existing key files"),
                ),
        )
        .subcommand(
            Command::new("ledger")
                .about("Inspect and validate the ledger")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("List ledger entries in append order")
                        .arg(ledger_arg())
                        .arg(
                            Arg::new("json")
                                .long("json")
                                .action(clap::ArgAction::SetTrue)
                                .help("Print entries as NDJSON"),
                        ),
                )
                .subcommand(
                    Command::new("verify")
                        .about("Audit the whole chain: links, entry hashes, unique capsule ids")
                        .arg(ledger_arg()),
                )
                .subcommand(
                    Command::new("tip")
                        .about("Print the current chain tip")
                        .arg(ledger_arg()),
                )
                .subcommand(
                    Command::new("check")
                        .about("Verify a capsule and check that the ledger records it consistently")
                        .arg(capsule_arg())
                        .args(trust_args())
                        .arg(ledger_arg()),
                ),
        )
        .after_help(
            "EXIT STATUS:\n  0  success\n  1  usage, IO, config or key error\n  2  capsule untrusted\n  3  payload execution failed\n  4  ledger chain failure",
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("capsule.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
