//! CLI command implementations.

pub mod dump;
pub mod send;
pub mod verify;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Opens a stream file for reading; `-` reads standard input.
pub fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    if path == Path::new("-") {
        Ok(Box::new(io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}
