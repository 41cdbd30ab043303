pub mod categories;
pub mod transactions;
pub mod users;
