// ── Store data model ──
//
// Records, their field values, and the selector sum type used to
// address records by key, index, range or list.

mod record;
mod selector;

pub use record::{Field, Record};
pub use selector::Selector;
