//! Console commands typed by the user, one per line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Postals,
    Postal { code: String },
    Email { address: String },
    Submit,
    Validate,
    Remove,
    Back,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingArgument(&'static str),
    Unknown(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty command"),
            ParseError::MissingArgument(command) => {
                write!(f, "'{command}' needs an argument; see 'help'")
            }
            ParseError::Unknown(word) => write!(f, "unknown command '{word}'; see 'help'"),
        }
    }
}

pub const HELP: &str = "\
commands:
  postals            load and list the postal codes
  postal <code>      select a postal code from the list
  email <address>    set the email address for alerts
  submit             queue the subscription (request step)
  validate           validate the queued token (pending step)
  remove             unsubscribe (active step)
  back               return to the request step (active step)
  status             show the current workflow state
  help               show this help
  quit               leave";

pub fn parse(line: &str) -> Result<ShellCommand, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let argument = |command: &'static str| {
        if rest.is_empty() {
            Err(ParseError::MissingArgument(command))
        } else {
            Ok(rest.to_string())
        }
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "postals" | "list" => Ok(ShellCommand::Postals),
        "postal" => Ok(ShellCommand::Postal {
            code: argument("postal")?,
        }),
        "email" => Ok(ShellCommand::Email {
            address: argument("email")?,
        }),
        "submit" | "request" => Ok(ShellCommand::Submit),
        "validate" => Ok(ShellCommand::Validate),
        "remove" | "unsubscribe" => Ok(ShellCommand::Remove),
        "back" => Ok(ShellCommand::Back),
        "status" => Ok(ShellCommand::Status),
        "help" | "?" => Ok(ShellCommand::Help),
        "quit" | "exit" => Ok(ShellCommand::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}
