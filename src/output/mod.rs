//! Terminal output for CLI commands.
//!
//! Each command renders either human-readable text ([`text`]) or pretty JSON
//! ([`write_json`]). Audit exports are rendered by [`crate::report`].

pub mod text;

use std::io::{self, Write};

use serde::Serialize;

/// Write `value` as pretty-printed JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)
}
