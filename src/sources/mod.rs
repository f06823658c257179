pub mod http;
pub mod notes;

pub use http::{JsonSearchConfig, JsonSearchSource};
pub use notes::{NoteRecord, NotesSource};
