pub mod events;
pub mod loaders;
pub mod profile;
pub mod scraped_item;

pub use events::AgentEvent;
pub use loaders::{load_all_profiles, load_profile};
pub use profile::Profile;
pub use scraped_item::ScrapedItem;
