pub mod cli;
pub mod collect;
pub mod deps;
pub mod form;
pub mod html;
pub mod options;
pub mod recent;
pub mod refs;
pub mod render;
pub mod schema;
pub mod session;
pub mod tui;
pub mod validate;

pub use session::{FormError, FormSession, OptionsLoad, SessionSettings};
