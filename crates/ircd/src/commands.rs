//! Typed commands and the registry that builds them from tokenized lines.
//!
//! Each known code maps to a small parser that validates argument counts
//! and shapes; unknown codes become [`Command::Unknown`] so the dispatcher
//! can answer `ERR_UNKNOWNCOMMAND`.

use thiserror::Error;

use crate::modes::ModeOp;
use crate::names::{Name, Text};
use crate::parsers::parse_line;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command}: not enough arguments")]
    NotEnoughArgs { command: String },

    #[error("{command}: {reason}")]
    Parse { command: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapSubCommand {
    Ls,
    List,
    Req,
    End,
}

impl CapSubCommand {
    /// CAP subcommands arrive in any case and are uppercased first.
    pub fn from_arg(arg: &str) -> Option<Self> {
        match arg.to_uppercase().as_str() {
            "LS" => Some(CapSubCommand::Ls),
            "LIST" => Some(CapSubCommand::List),
            "REQ" => Some(CapSubCommand::Req),
            "END" => Some(CapSubCommand::End),
            _ => None,
        }
    }
}

/// One user-mode letter with its operator, unvalidated: unknown letters are
/// rejected at apply time with `ERR_UMODEUNKNOWNFLAG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserModeArg {
    pub op: ModeOp,
    pub mode: char,
}

/// One channel-mode letter with its operator and consumed argument token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelModeArg {
    pub op: ModeOp,
    pub mode: char,
    pub arg: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Authenticate { arg: String },
    Away { text: Option<Text> },
    Cap { sub: Option<CapSubCommand>, raw_sub: String, caps: Vec<String> },
    Invite { nickname: Name, channel: Name },
    IsOn { nicks: Vec<Name> },
    /// `JOIN 0` parses as `zero`.
    Join { zero: bool, channels: Vec<(Name, Option<String>)> },
    Kick { kicks: Vec<(Name, Name)>, comment: Option<Text> },
    Kill { nickname: Name, comment: Text },
    List { channels: Vec<Name>, target: Option<Name> },
    LUsers,
    Motd { target: Option<Name> },
    Names { channels: Vec<Name>, target: Option<Name> },
    Nick { nickname: Name },
    Notice { target: Name, message: Text },
    Oper { name: Name, password: String },
    Part { channels: Vec<Name>, message: Option<Text> },
    Pass { password: String },
    Ping { origin: Name },
    Pong { origin: Name },
    PrivMsg { target: Name, message: Text },
    Quit { message: Option<Text> },
    Rehash,
    Time { target: Option<Name> },
    Topic { channel: Name, topic: Option<Text> },
    /// Both historical USER shapes normalize to this; the RFC 1459 host and
    /// server fields are discarded.
    User { username: Name, mode: u8, realname: Text },
    UserModeCmd { nickname: Name, changes: Vec<UserModeArg> },
    ChannelModeCmd { channel: Name, changes: Vec<ChannelModeArg> },
    Version { target: Option<Name> },
    Wallops { message: Text },
    Who { mask: Option<Name>, operator_only: bool },
    Whois { target: Option<Name>, masks: Vec<Name> },
    WhoWas { nicknames: Vec<Name>, count: Option<i64>, target: Option<Name> },
    Unknown { command: String, args: Vec<String> },
}

/// Parse one trimmed wire line into a command. `None` means the line did
/// not yield a command token and is silently ignored.
pub fn parse_command(line: &str) -> Option<(String, Result<Command, CommandError>)> {
    let msg = parse_line(line)?;
    let code = msg.code.clone();
    Some((code, build(&msg.code, &msg.args)))
}

fn not_enough(command: &str) -> CommandError {
    CommandError::NotEnoughArgs { command: command.to_owned() }
}

fn parse_err(command: &str, reason: &str) -> CommandError {
    CommandError::Parse { command: command.to_owned(), reason: reason.to_owned() }
}

fn names_list(arg: &str) -> Vec<Name> {
    arg.split(',').filter(|s| !s.is_empty()).map(Name::new).collect()
}

fn build(code: &str, args: &[String]) -> Result<Command, CommandError> {
    let need = |n: usize| if args.len() < n { Err(not_enough(code)) } else { Ok(()) };

    match code {
        "AUTHENTICATE" => {
            need(1)?;
            Ok(Command::Authenticate { arg: args[0].clone() })
        }
        "AWAY" => Ok(Command::Away { text: args.first().map(|s| Text::new(s)) }),
        "CAP" => {
            need(1)?;
            let caps = args
                .get(1)
                .map(|s| s.split(' ').filter(|c| !c.is_empty()).map(str::to_owned).collect())
                .unwrap_or_default();
            Ok(Command::Cap {
                sub: CapSubCommand::from_arg(&args[0]),
                raw_sub: args[0].to_uppercase(),
                caps,
            })
        }
        "INVITE" => {
            need(2)?;
            Ok(Command::Invite { nickname: Name::new(&args[0]), channel: Name::new(&args[1]) })
        }
        "ISON" => {
            need(1)?;
            Ok(Command::IsOn { nicks: args.iter().map(|s| Name::new(s)).collect() })
        }
        "JOIN" => parse_join(code, args),
        "KICK" => parse_kick(code, args),
        "KILL" => {
            need(2)?;
            Ok(Command::Kill { nickname: Name::new(&args[0]), comment: Text::new(&args[1]) })
        }
        "LIST" => {
            let channels = args.first().map(|s| names_list(s)).unwrap_or_default();
            let target = args.get(1).map(|s| Name::new(s));
            Ok(Command::List { channels, target })
        }
        "LUSERS" => Ok(Command::LUsers),
        "MODE" => parse_mode(code, args),
        "MOTD" => Ok(Command::Motd { target: args.first().map(|s| Name::new(s)) }),
        "NAMES" => {
            let channels = args.first().map(|s| names_list(s)).unwrap_or_default();
            let target = args.get(1).map(|s| Name::new(s));
            Ok(Command::Names { channels, target })
        }
        "NICK" => {
            need(1)?;
            Ok(Command::Nick { nickname: Name::new(&args[0]) })
        }
        "NOTICE" => {
            need(2)?;
            Ok(Command::Notice { target: Name::new(&args[0]), message: Text::new(&args[1]) })
        }
        "OPER" => {
            need(2)?;
            Ok(Command::Oper { name: Name::new(&args[0]), password: args[1].clone() })
        }
        "PART" => {
            need(1)?;
            Ok(Command::Part {
                channels: names_list(&args[0]),
                message: args.get(1).map(|s| Text::new(s)),
            })
        }
        "PASS" => {
            need(1)?;
            Ok(Command::Pass { password: args[0].clone() })
        }
        "PING" => {
            need(1)?;
            Ok(Command::Ping { origin: Name::new(&args[0]) })
        }
        "PONG" => {
            need(1)?;
            Ok(Command::Pong { origin: Name::new(&args[0]) })
        }
        "PRIVMSG" => {
            need(2)?;
            Ok(Command::PrivMsg { target: Name::new(&args[0]), message: Text::new(&args[1]) })
        }
        "QUIT" => Ok(Command::Quit { message: args.first().map(|s| Text::new(s)) }),
        "REHASH" => Ok(Command::Rehash),
        "TIME" => Ok(Command::Time { target: args.first().map(|s| Name::new(s)) }),
        "TOPIC" => {
            need(1)?;
            Ok(Command::Topic {
                channel: Name::new(&args[0]),
                topic: args.get(1).map(|s| Text::new(s)),
            })
        }
        "USER" => parse_user(code, args),
        "VERSION" => Ok(Command::Version { target: args.first().map(|s| Name::new(s)) }),
        "WALLOPS" => {
            need(1)?;
            Ok(Command::Wallops { message: Text::new(&args[0]) })
        }
        "WHO" => Ok(Command::Who {
            mask: args.first().map(|s| Name::new(s)),
            operator_only: args.get(1).is_some_and(|a| a == "o"),
        }),
        "WHOIS" => parse_whois(code, args),
        "WHOWAS" => parse_whowas(code, args),
        _ => Ok(Command::Unknown { command: code.to_owned(), args: args.to_vec() }),
    }
}

// 3.2.1 Join message
//
//       Command: JOIN
//    Parameters: ( <channel> *( "," <channel> ) [ <key> *( "," <key> ) ] )
//                / "0"
//
//    Note that this message accepts a special argument ("0"), which is
//    a special request to leave all channels the user is currently a member
//    of.

fn parse_join(code: &str, args: &[String]) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(not_enough(code));
    }
    if args[0] == "0" {
        return Ok(Command::Join { zero: true, channels: Vec::new() });
    }

    let channels: Vec<&str> = args[0].split(',').filter(|s| !s.is_empty()).collect();
    let keys: Vec<&str> = args.get(1).map(|s| s.split(',').collect()).unwrap_or_default();

    let channels = channels
        .iter()
        .enumerate()
        .map(|(i, chan)| {
            let key = keys.get(i).filter(|k| !k.is_empty()).map(|k| (*k).to_owned());
            (Name::new(chan), key)
        })
        .collect();
    Ok(Command::Join { zero: false, channels })
}

// 3.2.8 Kick command
//
//    For the message to be syntactically correct, there MUST be either one
//    channel parameter and multiple user parameter, or as many channel
//    parameters as there are user parameters.

fn parse_kick(code: &str, args: &[String]) -> Result<Command, CommandError> {
    if args.len() < 2 {
        return Err(not_enough(code));
    }
    let channels = names_list(&args[0]);
    let users = names_list(&args[1]);
    if channels.len() != users.len() && users.len() != 1 {
        return Err(not_enough(code));
    }
    let kicks = channels
        .into_iter()
        .enumerate()
        .map(|(i, chan)| {
            let user = if users.len() == 1 { users[0].clone() } else { users[i].clone() };
            (chan, user)
        })
        .collect();
    Ok(Command::Kick { kicks, comment: args.get(2).map(|s| Text::new(s)) })
}

// MODE dispatches on whether the first argument names a channel.

fn parse_mode(code: &str, args: &[String]) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(not_enough(code));
    }
    let name = Name::new(&args[0]);
    if name.is_channel() {
        parse_channel_mode(name, &args[1..])
    } else {
        parse_user_mode(code, name, &args[1..])
    }
}

// MODE <nickname> *( ( "+" / "-" ) *( mode letters ) )

fn parse_user_mode(code: &str, nickname: Name, args: &[String]) -> Result<Command, CommandError> {
    let mut changes = Vec::new();
    for mode_arg in args {
        let mut chars = mode_arg.chars();
        let op = match chars.next() {
            Some('+') => ModeOp::Add,
            Some('-') => ModeOp::Remove,
            Some(_) => return Err(parse_err(code, "mode change must start with + or -")),
            None => continue,
        };
        for mode in chars {
            changes.push(UserModeArg { op, mode });
        }
    }
    Ok(Command::UserModeCmd { nickname, changes })
}

// MODE <channel> *( ( "-" / "+" ) *<modes> *<modeparams> )
//
// Key, limit, mask-list, op and voice modes consume one argument token
// each; a mask-list letter with no operator and no argument queries the
// list instead.

fn channel_mode_takes_arg(mode: char) -> bool {
    matches!(mode, 'k' | 'l' | 'b' | 'e' | 'I' | 'o' | 'v')
}

fn parse_channel_mode(channel: Name, args: &[String]) -> Result<Command, CommandError> {
    let mut changes = Vec::new();
    let mut args = args;
    while let Some(mode_arg) = args.first() {
        if mode_arg.is_empty() {
            args = &args[1..];
            continue;
        }

        let (op, letters) = match mode_arg.chars().next() {
            Some('+') => (ModeOp::Add, &mode_arg[1..]),
            Some('-') => (ModeOp::Remove, &mode_arg[1..]),
            _ => (ModeOp::List, mode_arg.as_str()),
        };

        let mut skip = 1;
        for mode in letters.chars() {
            let arg = if channel_mode_takes_arg(mode) && args.len() > skip {
                let value = args[skip].clone();
                skip += 1;
                Some(value)
            } else {
                None
            };
            changes.push(ChannelModeArg { op, mode, arg });
        }
        args = &args[skip..];
    }
    Ok(Command::ChannelModeCmd { channel, changes })
}

// 3.1.3 User message
//
//    RFC 1459:  USER <username> <hostname> <servername> <realname>
//    RFC 2812:  USER <user> <mode> <unused> <realname>
//
//    The shapes are told apart by whether the second argument parses as a
//    non-negative integer.

fn parse_user(code: &str, args: &[String]) -> Result<Command, CommandError> {
    if args.len() < 4 {
        return Err(not_enough(code));
    }
    let mode = args[1].parse::<u8>().unwrap_or(0);
    Ok(Command::User {
        username: Name::new(&args[0]),
        mode,
        realname: Text::new(&args[3]),
    })
}

// WHOIS [ <target> ] <mask> *( "," <mask> )

fn parse_whois(code: &str, args: &[String]) -> Result<Command, CommandError> {
    match args {
        [] => Err(not_enough(code)),
        [masks] => Ok(Command::Whois { target: None, masks: names_list(masks) }),
        [target, masks, ..] => Ok(Command::Whois {
            target: Some(Name::new(target)),
            masks: names_list(masks),
        }),
    }
}

// WHOWAS <nickname> *( "," <nickname> ) [ <count> [ <target> ] ]

fn parse_whowas(code: &str, args: &[String]) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(not_enough(code));
    }
    Ok(Command::WhoWas {
        nicknames: names_list(&args[0]),
        count: args.get(1).and_then(|s| s.parse().ok()),
        target: args.get(2).map(|s| Name::new(s)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        let (_, parsed) = parse_command(line).expect("line should tokenize");
        parsed.unwrap_or_else(|e| panic!("should parse {line:?}: {e}"))
    }

    fn error(line: &str) -> CommandError {
        let (_, parsed) = parse_command(line).expect("line should tokenize");
        parsed.expect_err("should fail to parse")
    }

    #[test]
    fn join_with_keys() {
        let cmd = command("JOIN #a,#b onlykey");
        match cmd {
            Command::Join { zero, channels } => {
                assert!(!zero);
                assert_eq!(channels.len(), 2);
                assert_eq!(channels[0].0, Name::new("#a"));
                assert_eq!(channels[0].1.as_deref(), Some("onlykey"));
                assert_eq!(channels[1].1, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn join_zero_is_a_sentinel() {
        assert_eq!(command("JOIN 0"), Command::Join { zero: true, channels: Vec::new() });
    }

    #[test]
    fn join_without_args_fails() {
        assert_eq!(error("JOIN"), CommandError::NotEnoughArgs { command: "JOIN".into() });
    }

    #[test]
    fn user_shapes_disambiguate_on_second_argument() {
        // RFC 2812: second argument is a mode bitmask
        match command("USER guest 8 * :Ronnie Reagan") {
            Command::User { username, mode, realname } => {
                assert_eq!(username, Name::new("guest"));
                assert_eq!(mode, 8);
                assert_eq!(realname, Text::plain("Ronnie Reagan"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // RFC 1459: second argument is a hostname, discarded
        match command("USER guest tolmoon tolsun :Ronnie Reagan") {
            Command::User { mode, .. } => assert_eq!(mode, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mode_splits_on_channel_vs_nickname() {
        assert!(matches!(command("MODE #rust +m"), Command::ChannelModeCmd { .. }));
        assert!(matches!(command("MODE alice +i"), Command::UserModeCmd { .. }));
    }

    #[test]
    fn user_mode_rejects_missing_operator() {
        assert!(matches!(error("MODE alice iw"), CommandError::Parse { .. }));
    }

    #[test]
    fn user_mode_changes_carry_operator() {
        match command("MODE alice +i-w") {
            Command::UserModeCmd { changes, .. } => {
                assert_eq!(
                    changes,
                    vec![
                        UserModeArg { op: ModeOp::Add, mode: 'i' },
                        UserModeArg { op: ModeOp::Remove, mode: 'w' },
                    ]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn channel_mode_consumes_arguments_per_letter() {
        match command("MODE #rust +kl secret 10") {
            Command::ChannelModeCmd { changes, .. } => {
                assert_eq!(changes.len(), 2);
                assert_eq!(changes[0].mode, 'k');
                assert_eq!(changes[0].arg.as_deref(), Some("secret"));
                assert_eq!(changes[1].mode, 'l');
                assert_eq!(changes[1].arg.as_deref(), Some("10"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bare_mask_mode_queries_the_list() {
        match command("MODE #rust b") {
            Command::ChannelModeCmd { changes, .. } => {
                assert_eq!(changes, vec![ChannelModeArg { op: ModeOp::List, mode: 'b', arg: None }]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn kick_requires_matching_lists() {
        assert!(matches!(
            error("KICK #a,#b u1,u2,u3"),
            CommandError::NotEnoughArgs { .. }
        ));
        match command("KICK #a,#b troll") {
            Command::Kick { kicks, .. } => {
                assert_eq!(kicks.len(), 2);
                assert_eq!(kicks[0].1, Name::new("troll"));
                assert_eq!(kicks[1].1, Name::new("troll"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cap_subcommand_is_uppercased() {
        match command("CAP ls 302") {
            Command::Cap { sub, raw_sub, .. } => {
                assert_eq!(sub, Some(CapSubCommand::Ls));
                assert_eq!(raw_sub, "LS");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match command("CAP REQ :multi-prefix sasl") {
            Command::Cap { sub, caps, .. } => {
                assert_eq!(sub, Some(CapSubCommand::Req));
                assert_eq!(caps, vec!["multi-prefix", "sasl"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn privmsg_detects_ctcp_action() {
        match command("PRIVMSG #rust :\x01ACTION waves\x01") {
            Command::PrivMsg { message, .. } => {
                assert_eq!(message, Text::Action("waves".to_owned()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_commands_keep_their_args() {
        match command("FROBNICATE a b :c d") {
            Command::Unknown { command, args } => {
                assert_eq!(command, "FROBNICATE");
                assert_eq!(args, vec!["a", "b", "c d"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn whois_with_target() {
        match command("WHOIS remote.server alice,bob") {
            Command::Whois { target, masks } => {
                assert_eq!(target, Some(Name::new("remote.server")));
                assert_eq!(masks, vec![Name::new("alice"), Name::new("bob")]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn whowas_count_is_optional() {
        match command("WHOWAS ghost 5") {
            Command::WhoWas { nicknames, count, .. } => {
                assert_eq!(nicknames, vec![Name::new("ghost")]);
                assert_eq!(count, Some(5));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
