pub mod event_sink;
pub mod llm_service;
pub mod profile_store;
pub mod reply_composer;
pub mod reply_journal;
pub mod reply_poster;
pub mod scraper;
pub mod seen_store;

pub use event_sink::{BroadcastSink, EventSink, FanOutSink, HttpSink, TracingSink};
pub use llm_service::{LlmService, TextGenerator};
pub use profile_store::{ProfileStore, TomlProfileStore};
pub use reply_composer::ReplyComposer;
pub use reply_journal::{JournalEntry, ReplyJournal};
pub use reply_poster::{HumanPacing, ReplyPoster};
pub use scraper::Scraper;
pub use seen_store::{JsonSeenStore, SeenStore};
