//! Readers and writers for Xbox 360 content formats.

pub mod account;
pub mod gpd;
pub mod io;
pub mod stfs;
pub mod xex;
