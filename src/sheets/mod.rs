//! Spreadsheet-backed worklist, result sink and progress store.

mod client;
mod progress;
mod sink;
mod worklist;

pub use client::{cell_text, SheetsClient, ValueRange};
pub use progress::SheetsProgressStore;
pub use sink::{metrics_row, SheetsResultSink};
pub use worklist::SheetsWorklistSource;
