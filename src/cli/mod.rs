pub mod command;
pub mod info;
pub mod progress;
pub mod remux;
pub mod split;
