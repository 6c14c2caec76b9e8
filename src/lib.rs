// Parking Registry - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod db;
pub mod error;
pub mod plate;
pub mod entities;    // Customers, vehicles, association history, invoices
pub mod billing;     // Monthly proportional billing
pub mod import;      // CSV bulk import
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use db::{
    Event,
    open_database, setup_database, insert_event, record_event, get_events_for_entity,
};
pub use error::{RegistryError, RegistryResult};
pub use plate::{is_valid_plate, sanitize_plate};
pub use entities::{
    Customer, CustomerInput, Vehicle, VehicleInput, AssociationInterval, Invoice,
    create_customer, get_customer, list_customers, update_customer, delete_customer,
    create_vehicle, get_vehicle, find_vehicle_by_plate, list_vehicles, update_vehicle, delete_vehicle,
    intervals_for_vehicle, get_invoice, list_invoices,
};
pub use billing::{
    generate, generate_run, BillingRun, BillingError, StoreError, BillingStore,
    SqliteBillingStore, CancelToken, Competence, IntegrityWarning, IntegrityIssue,
};
pub use import::{import_csv, import_csv_path, ImportReport, ImportRowError};
pub use config::AppConfig;
pub use logging::init_logging;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
