mod codex_entry;
mod fileheader;
mod journal;
mod scientific_research;

pub use codex_entry::CodexEntrySchema;
pub use fileheader::FileheaderSchema;
pub use journal::JournalSchema;
pub use scientific_research::ScientificResearchSchema;
