//! Verify command implementation.

use super::open_input;
use snapsend_stream::{CommandType, StreamReader};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Commands read with a valid checksum.
    pub commands: u64,
    /// Number of commands per type.
    pub counts: BTreeMap<CommandType, u64>,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying stream {}", path.display());
    println!();

    let result = verify(open_input(path)?);
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Stream verification passed");
        Ok(())
    } else {
        println!("✗ Stream verification failed");
        Err("Verification failed".into())
    }
}

/// Reads a whole stream and collects structural problems.
pub fn verify<R: Read>(input: R) -> VerifyResult {
    let mut result = VerifyResult::default();
    let reader = match StreamReader::new(input) {
        Ok(reader) => reader,
        Err(e) => {
            result.errors.push(format!("header: {e}"));
            return result;
        }
    };

    let mut ended = false;
    for cmd in reader {
        let cmd = match cmd {
            Ok(cmd) => cmd,
            Err(e) => {
                result
                    .errors
                    .push(format!("command #{}: {e}", result.commands));
                return result;
            }
        };
        if ended {
            result.errors.push(format!(
                "command #{} ({}) follows END",
                result.commands,
                cmd.kind.name()
            ));
        }
        if result.commands == 0
            && !matches!(cmd.kind, CommandType::Subvol | CommandType::Snapshot)
        {
            result.errors.push(format!(
                "stream starts with {} instead of SUBVOL or SNAPSHOT",
                cmd.kind.name()
            ));
        }
        ended |= cmd.kind == CommandType::End;
        result.commands += 1;
        *result.counts.entry(cmd.kind).or_insert(0) += 1;
    }
    if !ended {
        result.errors.push("stream is not terminated by END".to_string());
    }
    result
}

fn print_result(result: &VerifyResult) {
    println!("  Commands: {}", result.commands);
    for (kind, count) in &result.counts {
        println!("    {:<14} {}", kind.name(), count);
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapsend_stream::{AttributeType, CommandEncoder};

    fn stream(kinds: &[CommandType]) -> Vec<u8> {
        let mut encoder = CommandEncoder::new(Vec::new(), 4096);
        encoder.write_header().unwrap();
        for kind in kinds {
            encoder.begin(*kind).unwrap();
            if *kind != CommandType::End {
                encoder.put_path(AttributeType::Path, b"p").unwrap();
            }
            encoder.finish().unwrap();
        }
        encoder.into_sink()
    }

    #[test]
    fn well_formed_stream_passes() {
        let bytes = stream(&[CommandType::Subvol, CommandType::Mkdir, CommandType::End]);
        let result = verify(bytes.as_slice());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.commands, 3);
        assert_eq!(result.counts[&CommandType::Mkdir], 1);
    }

    #[test]
    fn missing_end_is_reported() {
        let bytes = stream(&[CommandType::Subvol, CommandType::Mkdir]);
        let result = verify(bytes.as_slice());
        assert!(result.errors.iter().any(|e| e.contains("END")));
    }

    #[test]
    fn corrupted_checksum_is_reported() {
        let mut bytes = stream(&[CommandType::Subvol, CommandType::End]);
        let last = bytes.len() - 11;
        bytes[last] ^= 0xff;
        let result = verify(bytes.as_slice());
        assert!(!result.is_ok());
    }

    #[test]
    fn bad_magic_is_reported() {
        let result = verify(&b"not a stream at all"[..]);
        assert!(result.errors[0].starts_with("header"));
    }

    #[test]
    fn wrong_first_command_is_reported() {
        let bytes = stream(&[CommandType::Mkdir, CommandType::End]);
        let result = verify(bytes.as_slice());
        assert!(result.errors.iter().any(|e| e.contains("instead of SUBVOL")));
    }
}
