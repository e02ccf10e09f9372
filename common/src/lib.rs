//! Small formatting helpers shared by every CLI subcommand's human-mode
//! output. Nothing here talks to the network, the filesystem, or a
//! subprocess — keep it that way so it stays trivially unit-testable.

pub mod elapsed;
pub mod table;
