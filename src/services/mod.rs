pub mod cache;
pub mod events;
pub mod recommendation;
pub mod scorers;
pub mod serving;
pub mod store;
pub mod tracking;
