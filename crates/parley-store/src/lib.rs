pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use messages::MessageRepo;
pub use users::{UserRepo, UserRow};
