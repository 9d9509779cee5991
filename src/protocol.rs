//! The control protocol: a line-oriented command set tunneled as SSH exec
//! requests. The command table is a small closed set, represented as a
//! tagged sum with a handler per variant.

use crate::error::CommandError;

/// The literal substring a `mount` response must contain on success — the
/// client's readiness signal. Only the prefix is compared: older server
/// builds emit `rsync-worker-<pvc>` instead of `rsync-server-<pvc>`, and
/// that quirk is left intact rather than silently "fixed".
pub const READY_TOKEN: &str = "Server pod ready:";

pub const WELCOME_BANNER: &str = "[TaoKan Server]\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Touch {
        kind: String,
        name: String,
        capacity: String,
        access_mode: Option<String>,
    },
    Mount {
        pvc: String,
    },
    Umount {
        pvc: String,
    },
}

impl Command {
    /// Parse a received command line (already split on whitespace by the
    /// SSH exec payload) into a [`Command`].
    pub fn parse(tokens: &[String]) -> Result<Self, CommandError> {
        let Some((head, rest)) = tokens.split_first() else {
            return Err(CommandError::Empty);
        };

        match head.as_str() {
            "status" => Ok(Command::Status),
            "touch" => {
                if rest.len() < 3 {
                    return Err(CommandError::WrongArity {
                        command: "touch",
                        expected: "<type> <name> <capacity> [accessMode]",
                        got: rest.len(),
                    });
                }
                let kind = rest[0].clone();
                let name = rest[1].clone();
                let capacity = rest[2].clone();
                let access_mode = rest.get(3).cloned();
                if kind == "raw" && access_mode.is_none() {
                    return Err(CommandError::RawRequiresAccessMode);
                }
                Ok(Command::Touch {
                    kind,
                    name,
                    capacity,
                    access_mode,
                })
            }
            "mount" => {
                let pvc = rest
                    .first()
                    .cloned()
                    .ok_or(CommandError::WrongArity {
                        command: "mount",
                        expected: "<pvc>",
                        got: 0,
                    })?;
                Ok(Command::Mount { pvc })
            }
            "umount" => {
                let pvc = rest
                    .first()
                    .cloned()
                    .ok_or(CommandError::WrongArity {
                        command: "umount",
                        expected: "<pvc>",
                        got: 0,
                    })?;
                Ok(Command::Umount { pvc })
            }
            other => Err(CommandError::Unsupported(other.to_string())),
        }
    }

    /// Render the command line as it travels over the SSH exec payload.
    pub fn to_line(&self) -> String {
        match self {
            Command::Status => "status".to_string(),
            Command::Touch {
                kind,
                name,
                capacity,
                access_mode,
            } => match access_mode {
                Some(mode) => format!("touch {kind} {name} {capacity} {mode}"),
                None => format!("touch {kind} {name} {capacity}"),
            },
            Command::Mount { pvc } => format!("mount {pvc}"),
            Command::Umount { pvc } => format!("umount {pvc}"),
        }
    }
}

pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Whether a `mount` response indicates the receiver reached Running.
pub fn contains_ready_token(response: &str) -> bool {
    response.lines().any(|line| line.contains(READY_TOKEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_touch_with_access_mode() {
        let cmd = Command::parse(&tokenize("touch raw raw-claim 1Gi ReadWriteMany")).unwrap();
        assert_eq!(
            cmd,
            Command::Touch {
                kind: "raw".to_string(),
                name: "raw-claim".to_string(),
                capacity: "1Gi".to_string(),
                access_mode: Some("ReadWriteMany".to_string()),
            }
        );
    }

    #[test]
    fn raw_touch_without_access_mode_is_an_error() {
        let err = Command::parse(&tokenize("touch raw raw-claim 1Gi")).unwrap_err();
        assert!(matches!(err, CommandError::RawRequiresAccessMode));
    }

    #[test]
    fn non_raw_touch_does_not_require_access_mode() {
        let cmd = Command::parse(&tokenize("touch user alice 10Gi")).unwrap();
        assert_eq!(cmd.to_line(), "touch user alice 10Gi");
    }

    #[test]
    fn unknown_command_is_unsupported() {
        let err = Command::parse(&tokenize("frobnicate x")).unwrap_err();
        assert!(matches!(err, CommandError::Unsupported(c) if c == "frobnicate"));
    }

    #[test]
    fn empty_line_is_empty_error() {
        let err = Command::parse(&tokenize("")).unwrap_err();
        assert!(matches!(err, CommandError::Empty));
    }

    #[test]
    fn ready_token_matches_by_prefix_regardless_of_pod_name() {
        assert!(contains_ready_token(
            "Server pod ready: rsync-server-claim-alice\n"
        ));
        // Older servers emit the worker name; the contract is prefix-only.
        assert!(contains_ready_token(
            "Server pod ready: rsync-worker-claim-alice\n"
        ));
        assert!(!contains_ready_token("Mounted by pod: something\n"));
    }
}
