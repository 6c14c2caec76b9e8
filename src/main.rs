use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_registry::{
    generate_run, import_csv_path, init_logging, intervals_for_vehicle, list_customers,
    list_invoices, list_vehicles, open_database, AppConfig, CancelToken, SqliteBillingStore,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "parking-registry")]
#[command(about = "Parking customer/vehicle registry with monthly subscriber billing.")]
struct CommandLine {
    /// SQLite database file (default: parking.db)
    #[arg(long, global = true, env = "PARKING_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Bulk import vehicles and customers from a CSV file
    Import { file: PathBuf },
    /// Generate invoices for a competence month (YYYY-MM)
    Generate {
        competence: String,
        /// Stop writing invoices after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List invoices
    Invoices {
        #[arg(long)]
        competence: Option<String>,
    },
    /// List customers
    Customers,
    /// List vehicles
    Vehicles {
        /// Only vehicles of this customer id
        #[arg(long)]
        customer: Option<String>,
    },
    /// Show a vehicle's ownership history
    History { vehicle_id: String },
}

fn main() -> Result<()> {
    init_logging();

    let cli = CommandLine::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let conn = open_database(&config.database_path)?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database ready: {}", config.database_path.display());
        }
        Commands::Import { file } => {
            println!("📂 Importing {}...", file.display());
            let report = import_csv_path(&conn, &file)?;
            println!("✓ Processed {} rows, inserted {} vehicles", report.processed, report.inserted);
            println!("  sha256: {}", report.source_sha256);
            for err in &report.errors {
                println!("  ⚠️  line {}: {} [{}]", err.line, err.reason, err.raw);
            }
        }
        Commands::Generate {
            competence,
            timeout_secs,
        } => {
            let timeout = timeout_secs.map(Duration::from_secs).or(config.billing_timeout);
            let cancel = timeout.map(CancelToken::with_timeout).unwrap_or_default();
            let store = SqliteBillingStore::new(&conn);

            let run = match generate_run(&store, &competence, &cancel) {
                Ok(run) => run,
                Err(e) => {
                    if !e.created().is_empty() {
                        println!("⚠️  {} invoices were written before the failure", e.created().len());
                    }
                    return Err(e).with_context(|| format!("Billing for {competence} failed"));
                }
            };

            println!("💳 {}", run.summary());
            for invoice in &run.created {
                println!(
                    "  {}  customer {}  {}  ({} vehicles)",
                    invoice.id,
                    invoice.customer_id,
                    invoice.amount,
                    invoice.vehicle_ids.len()
                );
            }
            for warning in &run.warnings {
                println!("  ⚠️  vehicle {}: {:?}", warning.vehicle_id, warning.issue);
            }
        }
        Commands::Invoices { competence } => {
            let invoices = list_invoices(&conn, competence.as_deref())?;
            println!("🧾 {} invoices", invoices.len());
            for invoice in invoices {
                println!(
                    "  {}  {}  customer {}  {}  vehicles: {}",
                    invoice.id,
                    invoice.competence,
                    invoice.customer_id,
                    invoice.amount,
                    invoice.vehicle_ids.join(", ")
                );
            }
        }
        Commands::Customers => {
            let customers = list_customers(&conn, false)?;
            println!("👤 {} customers", customers.len());
            for c in customers {
                let fee = c
                    .monthly_fee
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}  {}  phone: {}  subscriber: {}  fee: {}",
                    c.id,
                    c.name,
                    c.phone.as_deref().unwrap_or("-"),
                    c.is_subscriber,
                    fee
                );
            }
        }
        Commands::Vehicles { customer } => {
            let vehicles = list_vehicles(&conn, customer.as_deref())?;
            println!("🚗 {} vehicles", vehicles.len());
            for v in vehicles {
                println!(
                    "  {}  {}  {}  owner {}",
                    v.id,
                    v.plate,
                    v.model.as_deref().unwrap_or("-"),
                    v.customer_id
                );
            }
        }
        Commands::History { vehicle_id } => {
            let intervals = intervals_for_vehicle(&conn, &vehicle_id)?;
            println!("📜 {} intervals for vehicle {}", intervals.len(), vehicle_id);
            for i in intervals {
                let end = i.end.map(|d| d.to_string()).unwrap_or_else(|| "open".to_string());
                println!("  {} → {}  customer {}", i.start, end, i.customer_id);
            }
        }
    }

    Ok(())
}
