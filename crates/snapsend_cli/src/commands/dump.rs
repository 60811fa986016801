//! Dump command implementation.

use super::open_input;
use serde::Serialize;
use snapsend_stream::{AttributeType, Command, StreamReader};
use std::path::Path;
use uuid::Uuid;

/// One command prepared for output.
#[derive(Debug, Serialize)]
pub struct CommandInfo {
    /// Position in the stream, starting at zero.
    pub index: usize,
    /// Command name.
    pub command: &'static str,
    /// Decoded attributes as `(name, value)` in wire order.
    pub attributes: Vec<(&'static str, String)>,
}

/// Runs the dump command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reader = StreamReader::new(open_input(path)?)?;
    let mut commands = Vec::new();
    for (index, cmd) in reader.enumerate() {
        commands.push(describe(index, &cmd?));
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&commands)?);
        }
        _ => {
            print_text_output(&commands);
        }
    }

    Ok(())
}

/// Decodes every attribute of `cmd` into readable text.
pub fn describe(index: usize, cmd: &Command) -> CommandInfo {
    CommandInfo {
        index,
        command: cmd.kind.name(),
        attributes: cmd
            .attributes
            .iter()
            .map(|attr| (attr.kind.name(), render(attr.kind, &attr.value)))
            .collect(),
    }
}

fn render(kind: AttributeType, value: &[u8]) -> String {
    match kind {
        AttributeType::Uuid | AttributeType::CloneUuid => match Uuid::from_slice(value) {
            Ok(uuid) => uuid.hyphenated().to_string(),
            Err(_) => hex_encode(value),
        },
        AttributeType::Mode => match le_u64(value) {
            Some(mode) => format!("{mode:o}"),
            None => hex_encode(value),
        },
        AttributeType::Ctransid
        | AttributeType::Ino
        | AttributeType::Size
        | AttributeType::Uid
        | AttributeType::Gid
        | AttributeType::Rdev
        | AttributeType::FileOffset
        | AttributeType::CloneCtransid
        | AttributeType::CloneOffset
        | AttributeType::CloneLen => match le_u64(value) {
            Some(n) => n.to_string(),
            None => hex_encode(value),
        },
        AttributeType::Atime | AttributeType::Mtime | AttributeType::Ctime => {
            if value.len() == 12 {
                let mut sec = [0u8; 8];
                let mut nsec = [0u8; 4];
                sec.copy_from_slice(&value[..8]);
                nsec.copy_from_slice(&value[8..]);
                format!("{}.{:09}", u64::from_le_bytes(sec), u32::from_le_bytes(nsec))
            } else {
                hex_encode(value)
            }
        }
        AttributeType::Data => format!("<{} bytes>", value.len()),
        AttributeType::XattrData => {
            if value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                String::from_utf8_lossy(value).into_owned()
            } else {
                hex_encode(value)
            }
        }
        AttributeType::XattrName
        | AttributeType::Path
        | AttributeType::PathTo
        | AttributeType::PathLink
        | AttributeType::ClonePath => String::from_utf8_lossy(value).into_owned(),
    }
}

fn le_u64(value: &[u8]) -> Option<u64> {
    value.try_into().ok().map(u64::from_le_bytes)
}

fn print_text_output(commands: &[CommandInfo]) {
    for info in commands {
        print!("{:<14}", info.command);
        for (name, value) in &info.attributes {
            print!(" {name}={value}");
        }
        println!();
    }
    println!();
    println!("{} commands", commands.len());
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapsend_stream::{CommandEncoder, CommandType};

    fn sample() -> Vec<Command> {
        let mut encoder = CommandEncoder::new(Vec::new(), 4096);
        encoder.write_header().unwrap();
        encoder.begin(CommandType::Chmod).unwrap();
        encoder.put_path(AttributeType::Path, b"dir/file").unwrap();
        encoder.put_u64(AttributeType::Mode, 0o644).unwrap();
        encoder.finish().unwrap();
        encoder.begin(CommandType::Utimes).unwrap();
        encoder.put_path(AttributeType::Path, b"dir/file").unwrap();
        encoder.put_timespec(AttributeType::Mtime, 7, 5).unwrap();
        encoder.finish().unwrap();
        snapsend_stream::decode_stream(&encoder.into_sink()).unwrap()
    }

    #[test]
    fn attributes_are_decoded_by_type() {
        let commands = sample();
        let chmod = describe(0, &commands[0]);
        assert_eq!(chmod.command, "chmod");
        assert_eq!(
            chmod.attributes,
            vec![("path", "dir/file".to_string()), ("mode", "644".to_string())]
        );
        let utimes = describe(1, &commands[1]);
        assert_eq!(utimes.attributes[1], ("mtime", "7.000000005".to_string()));
    }

    #[test]
    fn binary_values_are_hex_encoded() {
        assert_eq!(render(AttributeType::XattrData, &[2, 0, 0, 0]), "02000000");
        assert_eq!(render(AttributeType::XattrData, b"plain"), "plain");
        assert_eq!(render(AttributeType::Data, &[0; 10]), "<10 bytes>");
        assert_eq!(render(AttributeType::Size, &[1, 2]), "0102");
    }
}
