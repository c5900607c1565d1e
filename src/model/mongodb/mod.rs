mod bson;
mod collection;
mod errors;

pub use bson::{opt_chrono_datetime_as_bson_datetime, Id};
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, is_transient_transaction_error};
