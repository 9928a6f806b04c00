//! Graph traversal primitives.
//!
//! A revision is stored flat: a list of numbered steps and a list of links
//! between them. `GraphModel` indexes that storage, `join` finds where
//! diverging branches meet again, `resolver` decides which step follows
//! another during a run, and `tree` turns the same storage into a nested
//! structure for display.

pub mod join;
pub mod model;
pub mod resolver;
pub mod tree;

pub use join::{find_first_join_point, find_join_point_for_links, find_join_point_for_step};
pub use model::GraphModel;
pub use resolver::{ContainerStack, NextStepResolver};
pub use tree::{build_tree, Branch, NodeSequence, StepNode, TreeBuilder};
