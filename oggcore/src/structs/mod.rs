//! Data structures representing Ogg format components.
//!
//! - **Pages** ([`page`]): header and body spans of one physical page
//! - **Packets** ([`packet`]): payload and framing metadata of one logical unit

pub mod packet;
pub mod page;
