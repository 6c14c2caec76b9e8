// Entity Models - registry master data + billing output
//
// Each entity has a stable UUID identity. Customers and vehicles are current
// snapshots edited through CRUD; the association history remembers who owned
// which vehicle when; invoices are produced by the billing run.

pub mod customer;
pub mod history;
pub mod invoice;
pub mod vehicle;

pub use customer::{
    create_customer, delete_customer, find_customer_by_name_phone, get_customer,
    list_customers, update_customer, Customer, CustomerInput,
};
pub use history::{
    close_open_interval, intervals_for_vehicle, list_intervals, open_interval,
    AssociationInterval,
};
pub use invoice::{get_invoice, invoice_exists, list_invoices, Invoice};
pub use vehicle::{
    create_vehicle, create_vehicle_at, delete_vehicle, delete_vehicle_at, find_vehicle_by_plate,
    get_vehicle, list_vehicles, update_vehicle, update_vehicle_at, Vehicle, VehicleInput,
};
