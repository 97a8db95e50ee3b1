pub mod db;
pub mod memstore;
pub mod pgstore;
pub mod store;
