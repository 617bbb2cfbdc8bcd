//! A declarative language for describing and exploring binary data formats.
//!
//! A definition file names the fields of a format in the order they appear on
//! disk; parsing an input against it produces a tree of [`core::value::Value`]s
//! that mirrors the definition. See [`driver::parse`] for the quickest way in:
//!
//! ```
//! let value = sonde::parse("x U8\ny U16\n", &[0x10, 0x34, 0x12], sonde::Options::default())?;
//! assert_eq!(value.get("x").unwrap().as_int(), Some(0x10));
//! assert_eq!(value.get("y").unwrap().as_int(), Some(0x1234));
//! # Ok::<(), sonde::driver::Error>(())
//! ```

pub mod core;
pub mod driver;
pub mod files;
pub mod gfx;
pub mod source;
pub mod surface;

pub use driver::{parse, parse_file, Driver, Options, Schema, Status};
