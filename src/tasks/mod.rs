//! The units of work the pipelines are composed of.
//!
//! Every task owns a disjoint prefix of the output tree, which is what makes
//! it safe for the watcher to run several of them at once.

pub mod archive;
pub mod html;
pub mod image;
pub mod mirror;
pub mod reset;
pub mod script;
pub mod styles;

pub use archive::Archive;
pub use html::Html;
pub use mirror::Mirror;
pub use reset::Reset;
pub use script::Bundle;
pub use styles::Stylesheet;
