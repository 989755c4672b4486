//! Local working trees of mirrored workspaces.

mod path;
mod tree;

pub use path::confined_join;
pub use tree::LocalTree;
