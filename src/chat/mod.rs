//! # Chat
//!
//! Chat components, the translation table, and per-connection masking of
//! translation keys the client may not know.

pub mod component;
pub mod locale;
pub mod masking;

pub use component::{ChatComponent, Content, Style, TranslationArg};
pub use locale::{LocaleEntry, LocaleTable};
pub use masking::{from_key, mask, MaskContext};
