pub mod ai_settings;
pub mod category;
pub mod transaction;
pub mod user;

pub use ai_settings::{AiProvider, AiSettings};
pub use category::{Category, NewCategory};
pub use transaction::{NewTransaction, Recurrence, Transaction, TransactionInput};
pub use user::{NewUser, User};
