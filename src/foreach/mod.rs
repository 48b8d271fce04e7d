//! Foreach expansion of queue statements
//!
//! Turns `queue [count] [vars] [in|from|matching ...]` into an ordered,
//! restartable sequence of per-job variable bindings.

mod args;
mod engine;
mod error;
mod items;
mod slice;
mod split;

pub use args::{
    parse_queue_args, ForeachMode, ItemSource, MatchKind, QueueArgs, DEFAULT_ITEM_VAR,
    ITEMDATA_SOURCE,
};
pub use engine::{Binding, Bindings, EmptyFieldPolicy, ForeachPlan};
pub use error::ForeachError;
pub use items::{load_items, ItemLoadOptions, LoadedItems};
pub use slice::Slice;
pub use split::{split_item, UNIT_SEPARATOR};
