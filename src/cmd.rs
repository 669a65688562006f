//! The `Cmd` object (§3 "Command"): name, argument list, reply encoding
//! preference, and the classification flags consulted by the router and
//! connection lifecycle.

use crate::commands::{lookup_command, CommandFlags};
use crate::parser::encode_command;
use crate::types::{ReplyEncoding, ToRedisArgs};

/// A single RESP command: name plus ordered argument list.
#[derive(Clone, Debug)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
    encoding: ReplyEncoding,
    flags: CommandFlags,
    /// Synthetic commands (currently only `ASKING`) whose reply must be
    /// dropped from pipeline results (§3, §4.9).
    ignore_reply: bool,
}

impl Cmd {
    pub fn new() -> Cmd {
        Cmd {
            args: Vec::new(),
            encoding: ReplyEncoding::Text,
            flags: CommandFlags::unknown(),
            ignore_reply: false,
        }
    }

    /// Starts a command with the given name already pushed as the first
    /// argument; classification flags are looked up from the static command
    /// table (§4.2).
    pub fn with_name(name: &str) -> Cmd {
        let mut cmd = Cmd::new();
        cmd.push_raw_arg(name.as_bytes().to_vec());
        cmd.flags = lookup_command(name).map(|c| c.flags).unwrap_or_else(|| {
            let mut f = CommandFlags::unknown();
            f.is_custom = true;
            f
        });
        cmd
    }

    /// Appends an argument, flattening collections (e.g. the variadic tail of
    /// `MSET`/`DEL`) per §4.1.
    pub fn arg<T: ToRedisArgs>(&mut self, arg: T) -> &mut Self {
        let mut parts = Vec::new();
        arg.write_redis_args(&mut parts);
        for part in parts {
            self.push_raw_arg(part);
        }
        self
    }

    fn push_raw_arg(&mut self, arg: Vec<u8>) {
        self.args.push(arg);
    }

    /// Requests binary (raw byte) decoding for this command's reply instead
    /// of the default UTF-8 text decoding.
    pub fn set_binary_encoding(&mut self) -> &mut Self {
        self.encoding = ReplyEncoding::Binary;
        self
    }

    pub fn encoding(&self) -> ReplyEncoding {
        self.encoding
    }

    pub fn name(&self) -> &str {
        self.args
            .first()
            .and_then(|a| std::str::from_utf8(a).ok())
            .unwrap_or("")
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg_at(&self, index: usize) -> Option<&[u8]> {
        self.args.get(index).map(|v| v.as_slice())
    }

    pub fn flags(&self) -> &CommandFlags {
        &self.flags
    }

    pub(crate) fn mark_ignored(&mut self) -> &mut Self {
        self.ignore_reply = true;
        self
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore_reply
    }

    /// Encodes this command into the packed RESP wire format.
    pub fn get_packed_command(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_command(&self.args, &mut out);
        out
    }

    /// Encodes this command directly onto a shared output buffer, used by
    /// the pipeline/transaction engine's single-write batching (§4.9).
    pub fn write_packed_command(&self, out: &mut Vec<u8>) {
        encode_command(&self.args, out);
    }
}

impl Default for Cmd {
    fn default() -> Self {
        Cmd::new()
    }
}

/// Starts building a new command. Equivalent to `Cmd::with_name`, kept as a
/// free function so call sites read as `cmd("GET").arg("key")`.
pub fn cmd(name: &str) -> Cmd {
    Cmd::with_name(name)
}

/// A command that should be routed to a node and whose arguments the router
/// needs to inspect (to extract keys) without owning it. Implemented by
/// `Cmd` and by the pipeline/transaction types so the router has one
/// interface regardless of whether it's looking at a single command or a
/// batch.
pub trait Routable {
    fn arg_idx(&self, idx: usize) -> Option<&[u8]>;
    fn command_name(&self) -> Option<&str>;
}

impl Routable for Cmd {
    fn arg_idx(&self, idx: usize) -> Option<&[u8]> {
        self.arg_at(idx)
    }
    fn command_name(&self) -> Option<&str> {
        let name = self.name();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_command_with_flattened_variadic_args() {
        let mut c = cmd("MSET");
        c.arg("a").arg(1).arg(vec!["b", "c"]);
        assert_eq!(c.name(), "MSET");
        assert_eq!(c.args()[1], b"a");
        assert_eq!(c.args()[2], b"1");
        assert_eq!(c.args()[3], b"b");
        assert_eq!(c.args()[4], b"c");
    }

    #[test]
    fn packed_command_matches_resp_array_format() {
        let mut c = cmd("GET");
        c.arg("foo");
        assert_eq!(c.get_packed_command(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn unknown_command_is_flagged_custom() {
        let c = cmd("FOO.BAR");
        assert!(c.flags().is_custom);
    }

    #[test]
    fn known_command_carries_its_classification() {
        let c = cmd("GET");
        assert!(c.flags().is_readonly);
        assert!(!c.flags().is_write);
    }
}
