pub mod catalog;
pub mod cli;
pub mod error;
pub mod fetch;
pub mod generation;
pub mod logging;
pub mod notifier;
pub mod reconcile;
pub mod refresh;
pub mod settings;
pub mod sources;
pub mod store;
pub mod types;
pub mod view;

pub use catalog::SharedCatalog;
pub use error::FetchError;
pub use fetch::DataSource;
pub use notifier::SubscriptionId;
pub use types::{Details, EmptyState, ItemFields, ItemKey, ListItem, QueryParams, Tag};
pub use view::{GenerationOutcome, LiveList, QueryTask, ViewConfig};
