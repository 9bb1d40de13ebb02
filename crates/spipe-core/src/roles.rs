//! Role resolver for the client command line
//!
//! Extracts the four brace-delimited role blocks (`-i`, `-o`, `-r`, `-l`)
//! from the argument list. A block opens with a literal `{` token and ends
//! at the matching `}`; nested literal braces are tracked by depth and kept
//! verbatim inside the command.

use crate::error::SocketpipeError;
use crate::types::RoleCommand;

/// The role commands found on a command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    pub input: Option<RoleCommand>,
    pub output: Option<RoleCommand>,
    pub remote: Option<RoleCommand>,
    pub login: Option<RoleCommand>,
}

impl RoleSet {
    /// Check that the roles describe a runnable pipeline: remote and login
    /// commands plus at least one of the producer or consumer.
    pub fn validate(&self) -> Result<(), SocketpipeError> {
        if self.remote.is_none() {
            return Err(SocketpipeError::usage("must specify remote command"));
        }
        if self.login.is_none() {
            return Err(SocketpipeError::usage("must specify remote login method"));
        }
        if self.input.is_none() && self.output.is_none() {
            return Err(SocketpipeError::usage(
                "must specify a local input or output process",
            ));
        }
        Ok(())
    }

    fn slot(&mut self, flag: &str) -> Option<&mut Option<RoleCommand>> {
        match flag {
            "-i" => Some(&mut self.input),
            "-o" => Some(&mut self.output),
            "-r" => Some(&mut self.remote),
            "-l" => Some(&mut self.login),
            _ => None,
        }
    }
}

/// Split `args` (without the program name) into role blocks and the
/// remaining option tokens.
pub fn resolve_roles(args: &[String]) -> Result<(RoleSet, Vec<String>), SocketpipeError> {
    let mut roles = RoleSet::default();
    let mut rest = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let Some(slot) = roles.slot(arg) else {
            rest.push(arg.clone());
            continue;
        };
        if slot.is_some() {
            return Err(SocketpipeError::usage(format!("{} specified more than once", arg)));
        }

        match iter.next() {
            Some(open) if open == "{" => {}
            _ => return Err(SocketpipeError::usage("opening block expected")),
        }

        let mut depth = 1usize;
        let mut tokens = Vec::new();
        loop {
            let Some(token) = iter.next() else {
                return Err(SocketpipeError::usage("unterminated block"));
            };
            match token.as_str() {
                "{" => depth += 1,
                "}" => depth -= 1,
                _ => {}
            }
            if depth == 0 {
                break;
            }
            tokens.push(token.clone());
        }

        *slot = Some(RoleCommand::new(tokens)?);
    }

    tracing::trace!(?roles, ?rest, "Resolved role blocks");
    Ok((roles, rest))
}
