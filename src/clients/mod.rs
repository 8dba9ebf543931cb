pub mod profile_client;

pub use profile_client::{BitBrowserClient, OpenedProfile, ProfileProvider};
