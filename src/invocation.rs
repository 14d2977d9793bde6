//! Command-line parsing.
//!
//! The surface is a single subcommand, parsed by hand:
//!
//! ```text
//! jailrun run <image[:tag]> <absolute-executable-path> [arg ...]
//! jailrun help | --help | -h
//! jailrun version
//! ```
//!
//! Everything after the executable path is passed to the target verbatim,
//! including arguments that look like flags.

use crate::error::{Error, Result};
use crate::reference::ImageReference;
use std::path::PathBuf;

/// Usage text printed for `help` and after usage errors.
pub const USAGE: &str = "\
Usage: jailrun run <image[:tag]> <absolute-executable-path> [arg ...]

Pulls <image> from the registry, assembles its filesystem in a private
directory and runs the executable there, chrooted, in new PID and UTS
namespaces. Exits with the executable's exit code.

Commands:
  run       Run an executable inside an image
  help      Show this message
  version   Show version

Environment:
  JAILRUN_LOG                 Log filter (default: warn)
  JAILRUN_REGISTRY_URL        Registry base URL
  JAILRUN_AUTH_URL            Token endpoint
  JAILRUN_AUTH_SERVICE        Token service name
  JAILRUN_PULL_TIMEOUT_SECS   Pull deadline in seconds (default: 300)
  JAILRUN_KEEP_JAIL           Keep the jail directory after the run
  JAILRUN_STDIO               inherit | null
  JAILRUN_VERIFY_DIGESTS      Verify layer digests (default: true)
  JAILRUN_HOSTNAME            Hostname inside the jail
";

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Invocation),
    Help,
    Version,
}

/// A validated `run` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub image: ImageReference,
    /// Absolute path of the executable, inside the jail.
    pub target: PathBuf,
    pub args: Vec<String>,
}

impl Command {
    /// Parses the full argument vector, program name included.
    pub fn parse(args: &[String]) -> Result<Self> {
        match args.get(1).map(String::as_str) {
            Some("help" | "--help" | "-h") => Ok(Command::Help),
            Some("version" | "--version" | "-V") => Ok(Command::Version),
            _ => Invocation::parse(args).map(Command::Run),
        }
    }
}

impl Invocation {
    /// Parses `<prog> run <image> <path> [args...]`.
    pub fn parse(args: &[String]) -> Result<Self> {
        if args.len() < 4 {
            return Err(Error::Usage(format!(
                "expected at least 3 arguments, got {}",
                args.len().saturating_sub(1)
            )));
        }
        if args[1] != "run" {
            return Err(Error::Usage(format!("unknown command '{}'", args[1])));
        }

        let image = ImageReference::parse(&args[2])?;

        let target = PathBuf::from(&args[3]);
        if !target.is_absolute() {
            return Err(Error::Usage(format!(
                "executable path must be absolute: '{}'",
                args[3]
            )));
        }

        Ok(Self {
            image,
            target,
            args: args[4..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_run() {
        let inv = Invocation::parse(&argv(&[
            "jailrun", "run", "alpine:3.19", "/bin/echo", "hello", "--flag",
        ]))
        .unwrap();
        assert_eq!(inv.image.tag(), "3.19");
        assert_eq!(inv.target, PathBuf::from("/bin/echo"));
        assert_eq!(inv.args, vec!["hello", "--flag"]);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(Command::parse(&argv(&["jailrun", "--help"])).unwrap(), Command::Help);
        assert_eq!(Command::parse(&argv(&["jailrun", "version"])).unwrap(), Command::Version);
        assert!(matches!(
            Command::parse(&argv(&["jailrun"])),
            Err(Error::Usage(_))
        ));
    }
}
