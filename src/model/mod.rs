//! # Property Graph Model
//!
//! Plain DTOs shared by every component: storage ↔ query ↔ pattern ↔
//! transaction ↔ diff ↔ projection.
//!
//! This module is pure data with no I/O or async.

pub mod node;
pub mod edge;
pub mod path;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use edge::{Direction, Edge, EdgeKey};
pub use path::Path;
pub use value::Value;
pub use property_map::{props, PropertyMap};
