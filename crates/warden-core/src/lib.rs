pub mod activity;
pub mod assignment;
pub mod cursor;
pub mod id;
pub mod rule;

pub use cursor::{Cursor, CursorError, Page, SortDirection};
pub use id::{is_valid_id, new_id, now};
