mod client;
mod models;

pub use client::ApifyClient;
pub use models::{item_to_record, ActorInput};
