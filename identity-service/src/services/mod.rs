pub mod aggregator;
pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod governance;
pub mod ledger;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod store;
pub mod timeouts;

pub use dispatcher::Dispatcher;
pub use engine::RequestEngine;
pub use error::ServiceError;
pub use governance::Governance;
