pub mod address;
pub mod quantity;
pub mod transaction;

pub use address::{normalize_address, validate_address};
pub use quantity::{format_quantity, parse_quantity};
pub use transaction::{Block, Transaction};
