pub mod csv_tasks;
pub mod legacy_json;
