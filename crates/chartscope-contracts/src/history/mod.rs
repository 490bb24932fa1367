mod record;
mod store;

pub use record::HistoryRecord;
pub use store::{HistoryStore, HISTORY_FILE_NAME};
