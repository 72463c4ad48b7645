// Client Net Worth - command line
//
//   networth init
//   networth import-csv holdings.csv
//   networth networth client-1 --as-of 2025-03-31
//   networth snapshot create client-1 --by adviser --label "annual review"
//   networth validate --client client-1 --type tenants_in_common --share a=60 --share b=41

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use client_networth::{
    get_owners, import_simple_holdings_csv, init_logging, open_database, AggregationEngine,
    AppConfig, AssociationType, NetWorthMatrix, NetWorthSnapshot, OwnerSet, OwnershipRecord,
    OwnershipValidator, Section, SharedConnection, SnapshotService,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "networth")]
#[command(version, about = "Client net worth statements and snapshots", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "networth.toml")]
    config: PathBuf,

    /// Override database path from config
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Write a config file with default values
    GenerateConfig {
        #[arg(short, long, default_value = "networth.toml")]
        output: PathBuf,
    },
    /// Import simple holdings from CSV
    ImportCsv {
        file: PathBuf,
        #[arg(long, default_value = "csv_importer")]
        actor: String,
    },
    /// List a client's owners in column order
    Owners { client_id: String },
    /// Show the live net worth statement
    Networth {
        client_id: String,
        /// Valuation date (YYYY-MM-DD), default today
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Create, list and show snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Check an ownership record without saving it
    Validate {
        #[arg(long)]
        client: String,
        /// individual, joint or tenants_in_common
        #[arg(long = "type")]
        association_type: String,
        /// owner[=percentage], repeatable
        #[arg(long = "share")]
        shares: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    Create {
        client_id: String,
        #[arg(long = "by", default_value = "cli")]
        created_by: String,
        #[arg(long)]
        label: Option<String>,
    },
    List {
        client_id: String,
    },
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(Some(&cli.config))?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::GenerateConfig { output } => run_generate_config(&output),
        Commands::ImportCsv { file, actor } => run_import(&config, &file, &actor),
        Commands::Owners { client_id } => run_owners(&config, &client_id),
        Commands::Networth {
            client_id,
            as_of,
            json,
        } => run_networth(&config, &client_id, as_of.unwrap_or_else(|| Utc::now().date_naive()), json),
        Commands::Snapshot { action } => run_snapshot(&config, action),
        Commands::Validate {
            client,
            association_type,
            shares,
        } => run_validate(&config, &client, &association_type, &shares),
    }
}

fn open_shared(config: &AppConfig) -> Result<SharedConnection> {
    Ok(Arc::new(Mutex::new(open_database(&config.database_path)?)))
}

// ============================================================================
// Commands
// ============================================================================

fn run_init(config: &AppConfig) -> Result<()> {
    open_database(&config.database_path)?;
    println!("✓ Database initialized with WAL mode: {}", config.database_path.display());
    Ok(())
}

fn run_generate_config(output: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&AppConfig::default())?;
    std::fs::write(output, content).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("✓ Wrote {}", output.display());
    Ok(())
}

fn run_import(config: &AppConfig, file: &Path, actor: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let stats = import_simple_holdings_csv(&conn, file, actor)?;
    println!("✓ Inserted: {} simple holdings", stats.inserted);
    println!("✓ Skipped duplicates: {}", stats.duplicates);
    Ok(())
}

fn run_owners(config: &AppConfig, client_id: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let owners = OwnerSet::new(&get_owners(&conn, client_id)?);

    if owners.is_empty() {
        println!("No owners recorded for {}", client_id);
    }
    for owner in owners.ordered() {
        println!("{:<20} {:<30} {}", owner.id, owner.display_name, owner.inception_date);
    }
    Ok(())
}

fn run_networth(config: &AppConfig, client_id: &str, as_of: NaiveDate, json: bool) -> Result<()> {
    let db = open_shared(config)?;
    let owners = {
        let conn = db.lock().map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
        get_owners(&conn, client_id)?
    };

    let matrix = AggregationEngine::with_database(db).aggregate(client_id, &owners, as_of)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&matrix)?);
    } else {
        print_matrix(&matrix);
    }
    Ok(())
}

fn run_snapshot(config: &AppConfig, action: SnapshotAction) -> Result<()> {
    let db = open_shared(config)?;
    let service = SnapshotService::with_database(db.clone());

    match action {
        SnapshotAction::Create {
            client_id,
            created_by,
            label,
        } => {
            let owners = {
                let conn = db.lock().map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
                get_owners(&conn, &client_id)?
            };
            let snapshot = service.create_snapshot(&client_id, &owners, &created_by, label.as_deref())?;
            println!("📸 Snapshot {} created at {}", snapshot.id, snapshot.created_at);
            println!("   Net worth: {}", snapshot.net_worth);
            if snapshot.matrix.has_issues() {
                println!("   ⚠️  {} item(s) excluded", snapshot.matrix.excluded_count());
            }
        }
        SnapshotAction::List { client_id } => {
            let summaries = service.list_snapshots(&client_id)?;
            if summaries.is_empty() {
                println!("No snapshots for {}", client_id);
            }
            for s in summaries {
                println!(
                    "{}  {}  as of {}  assets {}  liabilities {}  net {}  {}",
                    s.id,
                    s.created_at.format("%Y-%m-%d %H:%M:%S"),
                    s.as_of,
                    s.total_assets,
                    s.total_liabilities,
                    s.net_worth,
                    s.label.unwrap_or_default()
                );
            }
        }
        SnapshotAction::Show { id, json } => {
            let snapshot = service.get_snapshot(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot_header(&snapshot);
                print_matrix(&snapshot.matrix);
            }
        }
    }
    Ok(())
}

/// `owner=pct` pairs; a bare owner gets 100 for individual ownership, 0 otherwise
fn parse_shares(association_type: &str, shares: &[String]) -> Result<BTreeMap<String, Decimal>> {
    let implied = match association_type.parse::<AssociationType>() {
        Ok(AssociationType::Individual) => Decimal::ONE_HUNDRED,
        _ => Decimal::ZERO,
    };

    let mut parsed = BTreeMap::new();
    for share in shares {
        let (owner, pct) = match share.split_once('=') {
            Some((owner, pct)) => (
                owner.trim(),
                Decimal::from_str(pct.trim()).with_context(|| format!("`{}` is not a percentage", pct))?,
            ),
            None => (share.trim(), implied),
        };
        if owner.is_empty() {
            bail!("empty owner in share `{}`", share);
        }
        parsed.insert(owner.to_string(), pct);
    }
    Ok(parsed)
}

fn run_validate(config: &AppConfig, client_id: &str, association_type: &str, shares: &[String]) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let owners = OwnerSet::new(&get_owners(&conn, client_id)?);
    let record = OwnershipRecord::new(association_type, parse_shares(association_type, shares)?);

    match OwnershipValidator::new().validate(&record, owners.ids()) {
        Ok(ownership) => {
            println!("✅ Valid {} ownership", ownership.association_type());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {}: {}", e.code(), e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_snapshot_header(snapshot: &NetWorthSnapshot) {
    println!("📸 Snapshot {}", snapshot.id);
    println!("   Created {} by {}", snapshot.created_at, snapshot.created_by);
    if let Some(label) = &snapshot.label {
        println!("   Label: {}", label);
    }
    println!("   Content hash: {}", snapshot.content_hash);
}

fn print_section(section: &Section, owner_ids: &[String]) {
    println!("  {}", section.category);
    for row in &section.rows {
        let owner_cells: Vec<String> = owner_ids
            .iter()
            .map(|id| format!("{:>14}", row.per_owner.get(id).copied().unwrap_or_default()))
            .collect();
        println!(
            "    {:<32}{} {:>14} {:>14}",
            row.label,
            owner_cells.join(""),
            row.joint,
            row.value
        );
    }

    let subtotal_cells: Vec<String> = owner_ids
        .iter()
        .map(|id| format!("{:>14}", section.subtotal.for_owner(id)))
        .collect();
    println!(
        "    {:<32}{} {:>14} {:>14}",
        "Subtotal",
        subtotal_cells.join(""),
        section.subtotal.joint,
        section.subtotal.total
    );
}

fn print_matrix(matrix: &NetWorthMatrix) {
    let owner_ids: Vec<String> = matrix.owners.iter().map(|o| o.id.clone()).collect();
    let header: Vec<String> = matrix
        .owners
        .iter()
        .map(|o| format!("{:>14}", o.display_name))
        .collect();

    println!("\n💷 Net worth for {} as of {}", matrix.client_id, matrix.as_of);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("    {:<32}{} {:>14} {:>14}", "", header.join(""), "Joint", "Total");

    println!("\nAssets");
    for section in &matrix.assets {
        print_section(section, &owner_ids);
    }

    println!("\nLiabilities");
    for section in &matrix.liabilities {
        print_section(section, &owner_ids);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total assets:      {}", matrix.total_assets);
    println!("Total liabilities: {}", matrix.total_liabilities);
    println!("Net worth:         {}", matrix.net_worth);

    if matrix.has_issues() {
        println!("\n⚠️  {} item(s) excluded:", matrix.excluded_count());
        for issue in &matrix.issues {
            println!("   {} [{}] {}", issue.item, issue.code, issue.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shares() {
        let shares = parse_shares("tenants_in_common", &["a=60".into(), "b = 40".into()]).unwrap();
        assert_eq!(shares["a"], Decimal::from(60));
        assert_eq!(shares["b"], Decimal::from(40));

        let shares = parse_shares("individual", &["a".into()]).unwrap();
        assert_eq!(shares["a"], Decimal::ONE_HUNDRED);

        assert!(parse_shares("joint", &["a=lots".into()]).is_err());
    }
}
