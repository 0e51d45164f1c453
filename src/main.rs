//! zentinel-seclang CLI tool.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use zentinel_seclang::{Interruption, Phase, Result, Transaction, Waf};

#[derive(Parser)]
#[command(name = "zentinel-seclang")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if rules parse correctly
    Check {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Test a request against rules
    Test {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,

        /// Request URI
        #[arg(short, long)]
        uri: String,

        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Client address
        #[arg(long, default_value = "127.0.0.1")]
        client: String,

        /// Request headers (format: "Name: Value")
        #[arg(short = 'H', long)]
        header: Vec<String>,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// Print parsed rules
    Dump {
        /// Path to rules file
        #[arg(short, long)]
        rules: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Check { rules } => check_rules(&rules),
        Commands::Test {
            rules,
            uri,
            method,
            client,
            header,
            body,
        } => test_request(&rules, &uri, &method, &client, &header, body.as_deref()),
        Commands::Dump { rules } => dump_rules(&rules),
    }
}

fn check_rules(path: &Path) -> Result<()> {
    info!(path = %path.display(), "checking rules");
    let waf = Waf::from_file(path)?;
    println!("Successfully parsed {} rules", waf.rules().len());
    Ok(())
}

fn test_request(
    rules_path: &Path,
    uri: &str,
    method: &str,
    client: &str,
    headers: &[String],
    body: Option<&str>,
) -> Result<()> {
    info!(path = %rules_path.display(), "testing request");
    let waf = Waf::from_file(rules_path)?;
    let mut tx = waf.new_transaction();

    tx.process_connection(client, 0, "127.0.0.1", 80);
    tx.process_uri(uri, method, "HTTP/1.1");
    for header in headers {
        if let Some((name, value)) = header.split_once(':') {
            tx.add_request_header(name.trim(), value.trim());
        }
    }

    let mut verdict = tx.process_request_headers();
    if verdict.is_none() {
        if let Some(data) = body {
            let (limited, _) = tx.write_request_body(data.as_bytes())?;
            verdict = limited;
        }
    }
    if verdict.is_none() {
        verdict = tx.process_request_body()?;
    }
    tx.process_logging();

    match verdict {
        Some(it) => print_blocked(&it),
        None => println!("ALLOWED"),
    }
    print_matches(&tx);
    Ok(())
}

fn print_blocked(it: &Interruption) {
    println!("BLOCKED");
    println!("  Action: {}", it.action);
    println!("  Status: {}", it.status);
    println!("  Rule: {}", it.rule_id);
    if !it.data.is_empty() {
        println!("  Data: {}", it.data);
    }
}

fn print_matches(tx: &Transaction) {
    for matched in tx.matched_rules() {
        println!("  {}", matched.error_log());
    }
}

fn dump_rules(path: &Path) -> Result<()> {
    info!(path = %path.display(), "dumping rules");
    let waf = Waf::from_file(path)?;

    println!("Total rules: {}", waf.rules().len());
    println!("\nRules by phase:");

    for phase in Phase::all() {
        let rules: Vec<_> = waf
            .rules()
            .rules()
            .iter()
            .filter(|r| r.runs_in(*phase))
            .collect();
        if rules.is_empty() {
            continue;
        }
        println!("\n  Phase {phase}:");
        for rule in rules {
            if rule.is_marker() {
                println!("    - SecMarker {}", rule.sec_mark.as_deref().unwrap_or(""));
            } else {
                println!("    - Rule {} ({} link(s)) {}", rule.id, rule.chain_len(), rule.msg_text());
            }
        }
    }

    Ok(())
}
