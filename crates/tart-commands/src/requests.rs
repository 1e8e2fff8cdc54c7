//! Typed requests parsed from the transport's string parameters.

use std::collections::HashMap;

use tart_supervisor::{EditRequest, RestartPolicy};
use thiserror::Error;

/// `--key value` pairs as delivered by the transport.
pub type Params = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    ListTarts,
    NewTart,
    StartTart,
    StopTart,
    EditTart,
    RestartMode,
    AddOwner,
    RemoveOwner,
    DigestTartconfig,
    DeleteTart,
    TartStats,
}

/// One entry of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub alias: &'static str,
    pub usage: &'static str,
    pub required: &'static [&'static str],
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::ListTarts,
        name: "list-tarts",
        alias: "list",
        usage: "list-tarts",
        required: &[],
    },
    CommandSpec {
        kind: CommandKind::NewTart,
        name: "new-tart",
        alias: "new",
        usage: "new-tart --tart <pushURL> [--owner <username>]",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::StartTart,
        name: "start-tart",
        alias: "start",
        usage: "start-tart --tart <pushURL>",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::StopTart,
        name: "stop-tart",
        alias: "stop",
        usage: "stop-tart --tart <pushURL>",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::EditTart,
        name: "edit-tart",
        alias: "edit",
        usage: "edit-tart --tart <pushURL> [--name <name>] [--set-env \"<name>=<value>\"] \
                [--delete-env <name>] [--log-stdout yes/no]",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::RestartMode,
        name: "tart-restart-mode",
        alias: "set-restart-policy",
        usage: "tart-restart-mode --tart <pushURL> --enabled yes/no [--lull-period <seconds>]",
        required: &["tart", "enabled"],
    },
    CommandSpec {
        kind: CommandKind::AddOwner,
        name: "tart-add-owner",
        alias: "add-owner",
        usage: "tart-add-owner --tart <pushURL> --username <username>",
        required: &["tart", "username"],
    },
    CommandSpec {
        kind: CommandKind::RemoveOwner,
        name: "tart-remove-owner",
        alias: "remove-owner",
        usage: "tart-remove-owner --tart <pushURL> --username <username>",
        required: &["tart", "username"],
    },
    CommandSpec {
        kind: CommandKind::DigestTartconfig,
        name: "digest-tartconfig",
        alias: "digest-config",
        usage: "digest-tartconfig --tart <pushURL>",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::DeleteTart,
        name: "delete-tart",
        alias: "delete",
        usage: "delete-tart --tart <pushURL>",
        required: &["tart"],
    },
    CommandSpec {
        kind: CommandKind::TartStats,
        name: "tart-stats",
        alias: "stats",
        usage: "tart-stats --tart <pushURL>",
        required: &["tart"],
    },
];

impl CommandSpec {
    pub fn lookup(command: &str) -> Option<&'static CommandSpec> {
        COMMANDS
            .iter()
            .find(|spec| spec.name == command || spec.alias == command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListTarts,
    NewTart { tart: String, owner: Option<String> },
    StartTart { tart: String },
    StopTart { tart: String },
    EditTart { tart: String, edit: EditRequest },
    RestartMode { tart: String, policy: RestartPolicy },
    AddOwner { tart: String, username: String },
    RemoveOwner { tart: String, username: String },
    DigestTartconfig { tart: String },
    DeleteTart { tart: String },
    TartStats { tart: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Err: unknown command {0:?}")]
    UnknownCommand(String),

    #[error("USAGE: pushtart {usage}")]
    Usage {
        usage: &'static str,
        missing: Vec<&'static str>,
    },

    #[error("Err: could not read value for {field}. Did you provide an integer?")]
    NotAnInteger { field: &'static str },
}

impl RequestError {
    /// Every line to show the caller, in order.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        match self {
            RequestError::Usage { missing, .. } => {
                let fields: Vec<String> = missing.iter().map(|f| format!("--{f}")).collect();
                lines.push(format!("Missing fields: {}", fields.join(", ")));
            }
            RequestError::NotAnInteger { .. } => lines.push("Aborting.".to_string()),
            RequestError::UnknownCommand(_) => {}
        }
        lines
    }
}

impl Request {
    pub fn parse(command: &str, params: &Params) -> Result<Self, RequestError> {
        let spec = CommandSpec::lookup(command)
            .ok_or_else(|| RequestError::UnknownCommand(command.to_string()))?;

        let missing: Vec<&'static str> = spec
            .required
            .iter()
            .copied()
            .filter(|field| value(params, field).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(RequestError::Usage {
                usage: spec.usage,
                missing,
            });
        }

        let tart = || value(params, "tart").unwrap_or_default().to_string();
        let username = || value(params, "username").unwrap_or_default().to_string();
        let owned = |field: &str| value(params, field).map(str::to_string);

        Ok(match spec.kind {
            CommandKind::ListTarts => Request::ListTarts,
            CommandKind::NewTart => Request::NewTart {
                tart: tart(),
                owner: owned("owner"),
            },
            CommandKind::StartTart => Request::StartTart { tart: tart() },
            CommandKind::StopTart => Request::StopTart { tart: tart() },
            CommandKind::EditTart => Request::EditTart {
                tart: tart(),
                edit: EditRequest {
                    name: owned("name"),
                    set_env: owned("set-env"),
                    delete_env: owned("delete-env"),
                    log_stdout: value(params, "log-stdout").map(is_yes),
                },
            },
            CommandKind::RestartMode => {
                let lull_period_secs = match value(params, "lull-period") {
                    Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                        RequestError::NotAnInteger {
                            field: "lull-period",
                        }
                    })?),
                    None => None,
                };
                Request::RestartMode {
                    tart: tart(),
                    policy: RestartPolicy {
                        enabled: value(params, "enabled").is_some_and(is_yes),
                        lull_period_secs,
                    },
                }
            }
            CommandKind::AddOwner => Request::AddOwner {
                tart: tart(),
                username: username(),
            },
            CommandKind::RemoveOwner => Request::RemoveOwner {
                tart: tart(),
                username: username(),
            },
            CommandKind::DigestTartconfig => Request::DigestTartconfig { tart: tart() },
            CommandKind::DeleteTart => Request::DeleteTart { tart: tart() },
            CommandKind::TartStats => Request::TartStats { tart: tart() },
        })
    }
}

/// A parameter's value; empty values count as absent.
fn value<'a>(params: &'a Params, field: &str) -> Option<&'a str> {
    params
        .get(field)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn is_yes(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn aliases_resolve_to_the_same_command() {
        let p = params(&[("tart", "/blog")]);
        assert_eq!(
            Request::parse("stop", &p).unwrap(),
            Request::parse("stop-tart", &p).unwrap()
        );
        assert_eq!(
            Request::parse("list", &Params::new()).unwrap(),
            Request::ListTarts
        );
    }

    #[test]
    fn missing_fields_produce_usage() {
        let err = Request::parse("tart-add-owner", &params(&[("tart", "/blog")])).unwrap_err();
        assert_eq!(
            err.lines(),
            vec![
                "USAGE: pushtart tart-add-owner --tart <pushURL> --username <username>".to_string(),
                "Missing fields: --username".to_string(),
            ]
        );
    }

    #[test]
    fn empty_values_count_as_missing() {
        let err = Request::parse("start-tart", &params(&[("tart", "")])).unwrap_err();
        assert!(matches!(err, RequestError::Usage { ref missing, .. } if missing == &["tart"]));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            Request::parse("launch-rockets", &Params::new()),
            Err(RequestError::UnknownCommand("launch-rockets".to_string()))
        );
    }

    #[test]
    fn edit_collects_optional_fields() {
        let p = params(&[("tart", "/blog"), ("set-env", "PORT=8080"), ("log-stdout", "YES")]);
        let Request::EditTart { tart, edit } = Request::parse("edit-tart", &p).unwrap() else {
            panic!("expected edit request");
        };
        assert_eq!(tart, "/blog");
        assert_eq!(edit.set_env.as_deref(), Some("PORT=8080"));
        assert_eq!(edit.log_stdout, Some(true));
        assert_eq!(edit.name, None);
        assert_eq!(edit.delete_env, None);
    }

    #[test]
    fn anything_but_yes_is_no() {
        let p = params(&[("tart", "/blog"), ("log-stdout", "true")]);
        let Request::EditTart { edit, .. } = Request::parse("edit", &p).unwrap() else {
            panic!("expected edit request");
        };
        assert_eq!(edit.log_stdout, Some(false));
    }

    #[test]
    fn restart_mode_parses_lull_period() {
        let p = params(&[("tart", "/blog"), ("enabled", "yes"), ("lull-period", "5")]);
        assert_eq!(
            Request::parse("tart-restart-mode", &p).unwrap(),
            Request::RestartMode {
                tart: "/blog".to_string(),
                policy: RestartPolicy {
                    enabled: true,
                    lull_period_secs: Some(5),
                },
            }
        );
    }

    #[test]
    fn restart_mode_rejects_non_integer_lull_period() {
        for bad in ["soon", "-3", "1.5"] {
            let p = params(&[("tart", "/blog"), ("enabled", "yes"), ("lull-period", bad)]);
            let err = Request::parse("tart-restart-mode", &p).unwrap_err();
            assert_eq!(
                err.lines(),
                vec![
                    "Err: could not read value for lull-period. Did you provide an integer?"
                        .to_string(),
                    "Aborting.".to_string(),
                ]
            );
        }
    }

    #[test]
    fn every_command_has_a_distinct_name_and_alias() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMANDS {
            assert!(seen.insert(spec.name), "duplicate {}", spec.name);
            assert!(seen.insert(spec.alias), "duplicate {}", spec.alias);
            assert!(spec.usage.starts_with(spec.name));
        }
    }
}
