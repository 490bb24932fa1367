mod catalog;

pub use catalog::{Style, StyleCatalog, StyleSummary, DEFAULT_STYLE_KEY};
