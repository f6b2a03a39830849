//! Derived metadata of method bodies: `max_stack`, `max_locals` and the stack map frames.

pub mod frame;
pub mod hierarchy;
pub(crate) mod stack_map;
