pub mod ident;
pub mod value;

pub use ident::{hash_name, Ident};
pub use value::{ColumnRef, RowRef, Value, ValueKind};
