mod client;
pub mod engagement;
pub mod roles;

pub use client::{DiscordClient, SessionHeaders};
