pub mod normalized_item;
pub mod raw_item;
pub mod source;
pub mod task;
