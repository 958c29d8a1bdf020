//! Slash-command parsing for the input line.

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: send to the active channel
    Message { text: String },
    /// `/reply <id> <text>`
    Reply { to: String, text: String },
    /// `/nick <name>`: rejoin under a new name
    Nick { name: String },
    /// `/join`: rejoin with the current name
    Join,
    /// `/leave`
    Leave,
    /// `/channel <name>`
    Channel { name: String },
    /// `/thread <id>` opens a thread, `/thread` closes it
    Thread { root: Option<String> },
    /// `/key <passphrase>`
    SetKey { passphrase: String },
    /// `/key` without arguments
    ShowKey,
    /// `/nokey`
    ClearKey,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Unrecognized slash command
    Unknown { input: String },
    /// Known command, wrong arguments
    InvalidArgs { command: &'static str, error: &'static str },
}

/// Parse one input line. Leading `//` escapes a literal slash.
pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(literal) = line.strip_prefix("//") {
        return Command::Message { text: format!("/{literal}") };
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Message { text: line.to_string() };
    };

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };

    match command {
        "reply" => match args.split_once(char::is_whitespace) {
            Some((to, text)) if !text.trim().is_empty() => {
                Command::Reply { to: to.to_string(), text: text.trim().to_string() }
            },
            _ => Command::InvalidArgs { command: "reply", error: "usage: /reply <id> <text>" },
        },
        "nick" if args.is_empty() => Command::InvalidArgs { command: "nick", error: "usage: /nick <name>" },
        "nick" => Command::Nick { name: args.to_string() },
        "join" => Command::Join,
        "leave" => Command::Leave,
        "channel" if args.is_empty() => {
            Command::InvalidArgs { command: "channel", error: "usage: /channel <name>" }
        },
        "channel" => Command::Channel { name: args.to_string() },
        "thread" => Command::Thread { root: (!args.is_empty()).then(|| args.to_string()) },
        "key" if args.is_empty() => Command::ShowKey,
        "key" => Command::SetKey { passphrase: args.to_string() },
        "nokey" => Command::ClearKey,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown { input: line.to_string() },
    }
}
