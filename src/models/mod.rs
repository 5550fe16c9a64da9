pub mod conversation;
pub mod entry;
pub mod job;
pub mod log_file;
pub mod saved_search;
pub mod tenant;

pub use conversation::*;
pub use entry::*;
pub use job::*;
pub use log_file::*;
pub use saved_search::*;
pub use tenant::*;
