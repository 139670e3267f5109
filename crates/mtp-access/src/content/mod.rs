//! The device content tree: node kinds, logical paths, and the nodes themselves.

mod kind;
mod node;
pub mod path;

pub use kind::ContentKind;
pub use node::{Children, ContentInfo, ContentNode};
