//! CRDT element types.
//!
//! # Element taxonomy
//!
//! | Rust type       | Semantics                                   |
//! |-----------------|---------------------------------------------|
//! | `CrdtPrimitive` | Immutable scalar value                      |
//! | `CrdtObject`    | LWW key→element map over an element RHT     |
//! | `CrdtArray`     | RGA-ordered sequence of element references  |
//! | `CrdtCounter`   | Numeric accumulator (i32 / i64)             |
//! | `CrdtText`      | RGA tree-split of styled text runs          |
//! | `CrdtTree`      | Nested tree with parent/left-sibling order  |
//!
//! Container elements store child *ids*; the element structs
//! themselves live in the [`root::CrdtRoot`] registry keyed by their
//! creation ticket.

pub mod array;
pub mod counter;
pub mod element;
pub mod index_tree;
pub mod object;
pub mod primitive;
pub mod rga_tree_split;
pub mod rht;
pub mod root;
pub mod text;
pub mod tree;

pub use array::{CrdtArray, RgaTreeList};
pub use counter::CrdtCounter;
pub use element::{CrdtElement, ElementMeta};
pub use index_tree::IndexTree;
pub use object::{CrdtObject, ElementRht, SetOutcome};
pub use primitive::CrdtPrimitive;
pub use rga_tree_split::{
    ContentChange, RgaTreeSplit, SplitNodeId, SplitPos, SplitValue,
};
pub use rht::Rht;
pub use root::CrdtRoot;
pub use text::{CrdtText, TextValue};
pub use tree::{CrdtTree, TreeNodeDesc, TreeNodeId, TreePos};
