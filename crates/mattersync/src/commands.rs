/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect { server: String },
    Disconnect { server: String },
    Focus { server: String, channel: String },
    Say { server: String, channel: String, message: String },
    Reply { server: String, channel: String, root: String, message: String },
    Run { server: String, channel: String, command: String },
    React { server: String, post: String, emoji: String },
    Unreact { server: String, post: String, emoji: String },
    Delete { server: String, post: String },
    File { server: String, file: String },
    Quit,
}

pub const USAGE: &str = "commands: connect <server> | disconnect <server> | focus <server> <channel> | \
    say <server> <channel> <text> | reply <server> <channel> <root> <text> | \
    run <server> <channel> <command> | react|unreact <server> <post> <emoji> | \
    delete <server> <post> | file <server> <file> | quit";

/// Splits off `n` words and keeps the remainder as free text.
fn words(line: &str, n: usize) -> Option<(Vec<String>, String)> {
    let mut rest = line.trim_start();
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        out.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    Some((out, rest.to_string()))
}

pub fn parse(line: &str) -> Option<Command> {
    let (verb, rest) = words(line.trim_end(), 1)?;
    let rest = rest.as_str();
    let exact = |n: usize| words(rest, n).filter(|(_, tail)| tail.is_empty()).map(|(w, _)| w);
    let text = |n: usize| words(rest, n).filter(|(_, tail)| !tail.is_empty());

    let command = match verb[0].as_str() {
        "connect" => {
            let [server]: [String; 1] = exact(1)?.try_into().ok()?;
            Command::Connect { server }
        }
        "disconnect" => {
            let [server]: [String; 1] = exact(1)?.try_into().ok()?;
            Command::Disconnect { server }
        }
        "focus" => {
            let [server, channel]: [String; 2] = exact(2)?.try_into().ok()?;
            Command::Focus { server, channel }
        }
        "say" => {
            let (w, message) = text(2)?;
            let [server, channel]: [String; 2] = w.try_into().ok()?;
            Command::Say { server, channel, message }
        }
        "reply" => {
            let (w, message) = text(3)?;
            let [server, channel, root]: [String; 3] = w.try_into().ok()?;
            Command::Reply { server, channel, root, message }
        }
        "run" => {
            let (w, command) = text(2)?;
            let [server, channel]: [String; 2] = w.try_into().ok()?;
            Command::Run { server, channel, command }
        }
        "react" | "unreact" => {
            let [server, post, emoji]: [String; 3] = exact(3)?.try_into().ok()?;
            if verb[0] == "react" {
                Command::React { server, post, emoji }
            } else {
                Command::Unreact { server, post, emoji }
            }
        }
        "delete" => {
            let [server, post]: [String; 2] = exact(2)?.try_into().ok()?;
            Command::Delete { server, post }
        }
        "file" => {
            let [server, file]: [String; 2] = exact(2)?.try_into().ok()?;
            Command::File { server, file }
        }
        "quit" if rest.trim().is_empty() => Command::Quit,
        _ => return None,
    };
    Some(command)
}
