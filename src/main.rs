// ICAO PKD mirror and Passive Authentication engine, CLI entry point.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use local_pkd::app::ServiceContainer;
use local_pkd::config::Config;
use local_pkd::error::{PkdError, Result};
use local_pkd::ingest::IngestOutcome;
use local_pkd::models::PaStatus;
use local_pkd::pa::{PaReport, PaRequest};

#[derive(Parser)]
#[command(
    name = "local-pkd",
    about = "National ICAO PKD mirror and Passive Authentication engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the mirror: daily reconciliation plus ICAO portal polling.
    Serve,
    /// Ingest one trust-material file (PEM/DER/CMS/LDIF).
    Ingest {
        file: PathBuf,
        /// Parse and classify without touching the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Passively authenticate a SOD against the stored trust material.
    Verify {
        /// SOD file (binary, with or without the Tag 0x77 wrapper).
        sod: PathBuf,
        /// Data group files as N=PATH (e.g. --dg 1=dg1.bin --dg 2=dg2.bin).
        #[arg(long = "dg")]
        data_groups: Vec<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        document: Option<String>,
    },
    /// Run one reconciliation pass now.
    Reconcile,
    /// Poll the ICAO portal once and report newly published bundles.
    PortalCheck,
}

fn print_ingest_report(outcome: &IngestOutcome) {
    let upload = &outcome.upload;
    println!("\n===============================================");
    println!("             INGEST REPORT");
    println!("===============================================\n");
    println!("  File:        {}", upload.original_filename);
    println!("  Format:      {}", upload.format);
    println!("  Status:      {}", upload.status);
    if let Some(collection) = &upload.collection_number {
        println!("  Collection:  {collection}");
    }
    println!("  CSCA:        {}", upload.counters.csca);
    println!("  DSC:         {}", upload.counters.dsc);
    println!("  DSC (NC):    {}", upload.counters.dsc_nc);
    println!("  MLSC:        {}", upload.counters.mlsc);
    println!("  DVL signer:  {}", upload.counters.dvl_signer);
    println!("  Link:        {}", upload.counters.link);
    println!("  CRL:         {}", upload.counters.crl);
    println!("  Duplicates:  {}", upload.counters.duplicates);
    println!("  Errors:      {}", upload.counters.errors);
    if let Some(message) = &upload.error_message {
        println!("  Failure:     {message}");
    }
    for error in &outcome.parsing_errors {
        println!(
            "  - {} [{}]: {}",
            error.entry_dn.as_deref().unwrap_or("-"),
            error.code,
            error.message
        );
    }
}

fn print_pa_report(report: &PaReport) {
    let v = &report.verification;
    println!("\n===============================================");
    println!("       PASSIVE AUTHENTICATION REPORT");
    println!("===============================================\n");
    println!("  Verdict:        {}", v.status);
    println!("  Verification:   {}", v.id);
    let verdict_line = |value: Option<bool>| match value {
        Some(true) => "PASSED",
        Some(false) => "FAILED",
        None => "NOT RUN",
    };
    println!("  1. DG hashes:     {}", verdict_line(v.dg_hashes_valid));
    println!("  2. SOD signature: {}", verdict_line(v.sod_signature_valid));
    println!("  3. Trust chain:   {}", verdict_line(v.trust_chain_valid));
    println!("  4. Revocation:    {}", verdict_line(v.crl_clean));
    if let Some(dsc) = &v.dsc {
        println!("  DSC:  {} (serial {})", dsc.subject_dn, dsc.serial);
    }
    if let Some(csca) = &v.csca {
        println!("  CSCA: {}", csca.subject_dn);
    }
    for comparison in &report.dg_comparisons {
        let mark = if !comparison.presented {
            "absent"
        } else if comparison.valid {
            "ok"
        } else {
            "MISMATCH"
        };
        println!("  DG{:<2} {}", comparison.dg, mark);
    }
    if !v.message.is_empty() {
        println!("\n  Detail: {}", v.message);
    }
}

fn parse_dg_args(args: &[String]) -> Result<BTreeMap<u8, PathBuf>> {
    let mut out = BTreeMap::new();
    for arg in args {
        let (number, path) = arg
            .split_once('=')
            .ok_or_else(|| PkdError::Config(format!("--dg expects N=PATH, got {arg}")))?;
        let number: u8 = number
            .parse()
            .map_err(|_| PkdError::Config(format!("invalid data group number: {number}")))?;
        if !(1..=16).contains(&number) {
            return Err(PkdError::Config(format!(
                "data group number out of range: {number}"
            )));
        }
        out.insert(number, PathBuf::from(path));
    }
    Ok(out)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve => {
            let config = Config::from_env()?;
            let container = ServiceContainer::connect(config).await?;
            container.serve().await
        }
        Command::Ingest { file, dry_run } => {
            let container = if dry_run {
                ServiceContainer::in_memory(Config::from_lookup(&|key| match key {
                    "DB_PASSWORD" | "LDAP_BIND_PASSWORD" => Some("unused".to_string()),
                    _ => std::env::var(key).ok(),
                })?)
            } else {
                ServiceContainer::connect(Config::from_env()?).await?
            };
            let outcome = container.pipeline().ingest_path(&file).await?;
            print_ingest_report(&outcome);
            Ok(())
        }
        Command::Verify {
            sod,
            data_groups,
            country,
            document,
        } => {
            let container = ServiceContainer::connect(Config::from_env()?).await?;
            let sod_bytes = tokio::fs::read(&sod).await?;
            let mut dgs = BTreeMap::new();
            for (number, path) in parse_dg_args(&data_groups)? {
                dgs.insert(number, tokio::fs::read(&path).await?);
            }
            let report = container
                .pa_engine()
                .verify(PaRequest {
                    sod: sod_bytes,
                    data_groups: dgs,
                    issuing_country: country,
                    document_number: document,
                    client_ip: None,
                    user_agent: Some("local-pkd-cli".to_string()),
                })
                .await?;
            print_pa_report(&report);
            if report.verification.status != PaStatus::Valid {
                // Non-zero shell status for scripted callers; the verdict is
                // already printed.
                std::process::exit(10);
            }
            Ok(())
        }
        Command::Reconcile => {
            let container = ServiceContainer::connect(Config::from_env()?).await?;
            let status = container.reconciler().run_pass().await?;
            println!("\n===============================================");
            println!("          RECONCILIATION REPORT");
            println!("===============================================\n");
            println!(
                "  CSCA:   db {:>6}  ldap {:>6}",
                status.csca_db, status.csca_ldap
            );
            println!(
                "  DSC:    db {:>6}  ldap {:>6}",
                status.dsc_db, status.dsc_ldap
            );
            println!(
                "  DSC_NC: db {:>6}  ldap {:>6}",
                status.dsc_nc_db, status.dsc_nc_ldap
            );
            println!(
                "  CRL:    db {:>6}  ldap {:>6}",
                status.crl_db, status.crl_ldap
            );
            println!("  Total discrepancy: {}", status.total_discrepancy);
            println!(
                "  Sync required:     {}",
                if status.sync_required { "yes" } else { "no" }
            );
            Ok(())
        }
        Command::PortalCheck => {
            let container = ServiceContainer::connect(Config::from_env()?).await?;
            let outcome = container.portal_sync()?.check_once().await?;
            if outcome.new_versions.is_empty() {
                println!("No new ICAO bundles.");
            } else {
                for version in &outcome.new_versions {
                    println!(
                        "NEW {} {} v{} ({})",
                        version.collection, version.filename, version.version, version.status
                    );
                }
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
