//! Wire reply rendering.
//!
//! Two shapes, per the RFC:
//!
//! * string reply: `:<source> <CODE> <payload>`, source elided when the
//!   server speaks without an identity;
//! * numeric reply: `:<server> <NNN> <target-nick> <payload>`, always
//!   sourced from the server and addressed to the target's current nick.
//!
//! Every rendered line stays at or below 512 bytes including CRLF; the
//! multiline helper packs name lists greedily under that limit.

use crate::constants::*;
use crate::names::Text;

/// Payload of a numeric reply; the envelope (server, code, target nick) is
/// added by [`numeric`].
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric<'a> {
    Welcome { network: &'a str, id: &'a str },
    YourHost { server: &'a str, version: &'a str },
    Created { date: &'a str },
    MyInfo { server: &'a str, version: &'a str },

    UModeIs { modes: &'a str },
    LUserClient { users: usize, invisible: usize, servers: usize },
    LUserOp { count: usize },
    LUserUnknown { count: usize },
    LUserChannels { count: usize },
    LUserMe { clients: usize, servers: usize },

    Away { nick: &'a str, message: &'a str },
    IsOn { nicks: &'a str },
    UnAway,
    NowAway,
    WhoisUser { nick: &'a str, user: &'a str, host: &'a str, realname: &'a str },
    WhoisServer { nick: &'a str, server: &'a str, info: &'a str },
    WhoisOperator { nick: &'a str },
    WhoisIdle { nick: &'a str, idle: u64, signon: i64 },
    WhoisSecure { nick: &'a str },
    WhoisLoggedIn { nick: &'a str, account: &'a str },
    EndOfWhois { nick: &'a str },
    WhoWasUser { nick: &'a str, user: &'a str, host: &'a str, realname: &'a str },
    EndOfWhoWas { nick: &'a str },
    WhoReply {
        channel: &'a str,
        user: &'a str,
        host: &'a str,
        server: &'a str,
        nick: &'a str,
        flags: &'a str,
        hops: u32,
        realname: &'a str,
    },
    EndOfWho { name: &'a str },

    List { channel: &'a str, visible: usize, topic: &'a str },
    ListEnd,
    ChannelModeIs { channel: &'a str, modes: &'a str },
    NoTopic { channel: &'a str },
    Topic { channel: &'a str, topic: &'a str },
    Inviting { nick: &'a str, channel: &'a str },
    InviteList { channel: &'a str, mask: &'a str },
    EndOfInviteList { channel: &'a str },
    ExceptList { channel: &'a str, mask: &'a str },
    EndOfExceptList { channel: &'a str },
    BanList { channel: &'a str, mask: &'a str },
    EndOfBanList { channel: &'a str },
    EndOfNames { channel: &'a str },

    Version { version: &'a str, server: &'a str },
    Time { server: &'a str, time: &'a str },
    MotdStart { server: &'a str },
    Motd { line: &'a str },
    EndOfMotd,
    YoureOper,
    Rehashing { config: &'a str },

    NoSuchNick { nick: &'a str },
    NoSuchServer { server: &'a str },
    NoSuchChannel { channel: &'a str },
    CannotSendToChan { channel: &'a str },
    WasNoSuchNick { nick: &'a str },
    InvalidCapCmd { sub: &'a str },
    UnknownCommand { command: &'a str },
    NoMotd,
    NoNicknameGiven,
    ErroneusNickname { nick: &'a str },
    NicknameInUse { nick: &'a str },
    UserNotInChannel { nick: &'a str, channel: &'a str },
    NotOnChannel { channel: &'a str },
    UserOnChannel { nick: &'a str, channel: &'a str },
    NeedMoreParams { command: &'a str },
    AlreadyRegistered,
    PasswdMismatch,
    ChannelIsFull { channel: &'a str },
    UnknownMode { mode: char, channel: &'a str },
    InviteOnlyChan { channel: &'a str },
    BannedFromChan { channel: &'a str },
    BadChannelKey { channel: &'a str },
    NoPrivileges,
    ChanOPrivsNeeded { channel: &'a str },
    UModeUnknownFlag,
    UsersDontMatch,

    LoggedIn { id: &'a str, account: &'a str },
    SaslSuccess,
    SaslFail { reason: &'a str },
    SaslTooLong,
    SaslAborted,
    SaslAlready,
    SaslMechs { mechs: &'a str },
}

impl Numeric<'_> {
    pub fn code(&self) -> u16 {
        use Numeric::*;
        match self {
            Welcome { .. } => RPL_WELCOME,
            YourHost { .. } => RPL_YOURHOST,
            Created { .. } => RPL_CREATED,
            MyInfo { .. } => RPL_MYINFO,
            UModeIs { .. } => RPL_UMODEIS,
            LUserClient { .. } => RPL_LUSERCLIENT,
            LUserOp { .. } => RPL_LUSEROP,
            LUserUnknown { .. } => RPL_LUSERUNKNOWN,
            LUserChannels { .. } => RPL_LUSERCHANNELS,
            LUserMe { .. } => RPL_LUSERME,
            Away { .. } => RPL_AWAY,
            IsOn { .. } => RPL_ISON,
            UnAway => RPL_UNAWAY,
            NowAway => RPL_NOWAWAY,
            WhoisUser { .. } => RPL_WHOISUSER,
            WhoisServer { .. } => RPL_WHOISSERVER,
            WhoisOperator { .. } => RPL_WHOISOPERATOR,
            WhoisIdle { .. } => RPL_WHOISIDLE,
            WhoisSecure { .. } => RPL_WHOISSECURE,
            WhoisLoggedIn { .. } => RPL_WHOISLOGGEDIN,
            EndOfWhois { .. } => RPL_ENDOFWHOIS,
            WhoWasUser { .. } => RPL_WHOWASUSER,
            EndOfWhoWas { .. } => RPL_ENDOFWHOWAS,
            WhoReply { .. } => RPL_WHOREPLY,
            EndOfWho { .. } => RPL_ENDOFWHO,
            List { .. } => RPL_LIST,
            ListEnd => RPL_LISTEND,
            ChannelModeIs { .. } => RPL_CHANNELMODEIS,
            NoTopic { .. } => RPL_NOTOPIC,
            Topic { .. } => RPL_TOPIC,
            Inviting { .. } => RPL_INVITING,
            InviteList { .. } => RPL_INVITELIST,
            EndOfInviteList { .. } => RPL_ENDOFINVITELIST,
            ExceptList { .. } => RPL_EXCEPTLIST,
            EndOfExceptList { .. } => RPL_ENDOFEXCEPTLIST,
            BanList { .. } => RPL_BANLIST,
            EndOfBanList { .. } => RPL_ENDOFBANLIST,
            EndOfNames { .. } => RPL_ENDOFNAMES,
            Version { .. } => RPL_VERSION,
            Time { .. } => RPL_TIME,
            MotdStart { .. } => RPL_MOTDSTART,
            Motd { .. } => RPL_MOTD,
            EndOfMotd => RPL_ENDOFMOTD,
            YoureOper => RPL_YOUREOPER,
            Rehashing { .. } => RPL_REHASHING,
            NoSuchNick { .. } => ERR_NOSUCHNICK,
            NoSuchServer { .. } => ERR_NOSUCHSERVER,
            NoSuchChannel { .. } => ERR_NOSUCHCHANNEL,
            CannotSendToChan { .. } => ERR_CANNOTSENDTOCHAN,
            WasNoSuchNick { .. } => ERR_WASNOSUCHNICK,
            InvalidCapCmd { .. } => ERR_INVALIDCAPCMD,
            UnknownCommand { .. } => ERR_UNKNOWNCOMMAND,
            NoMotd => ERR_NOMOTD,
            NoNicknameGiven => ERR_NONICKNAMEGIVEN,
            ErroneusNickname { .. } => ERR_ERRONEUSNICKNAME,
            NicknameInUse { .. } => ERR_NICKNAMEINUSE,
            UserNotInChannel { .. } => ERR_USERNOTINCHANNEL,
            NotOnChannel { .. } => ERR_NOTONCHANNEL,
            UserOnChannel { .. } => ERR_USERONCHANNEL,
            NeedMoreParams { .. } => ERR_NEEDMOREPARAMS,
            AlreadyRegistered => ERR_ALREADYREGISTRED,
            PasswdMismatch => ERR_PASSWDMISMATCH,
            ChannelIsFull { .. } => ERR_CHANNELISFULL,
            UnknownMode { .. } => ERR_UNKNOWNMODE,
            InviteOnlyChan { .. } => ERR_INVITEONLYCHAN,
            BannedFromChan { .. } => ERR_BANNEDFROMCHAN,
            BadChannelKey { .. } => ERR_BADCHANNELKEY,
            NoPrivileges => ERR_NOPRIVILEGES,
            ChanOPrivsNeeded { .. } => ERR_CHANOPRIVSNEEDED,
            UModeUnknownFlag => ERR_UMODEUNKNOWNFLAG,
            UsersDontMatch => ERR_USERSDONTMATCH,
            LoggedIn { .. } => RPL_LOGGEDIN,
            SaslSuccess => RPL_SASLSUCCESS,
            SaslFail { .. } => ERR_SASLFAIL,
            SaslTooLong => ERR_SASLTOOLONG,
            SaslAborted => ERR_SASLABORTED,
            SaslAlready => ERR_SASLALREADY,
            SaslMechs { .. } => RPL_SASLMECHS,
        }
    }

    pub fn payload(&self) -> String {
        use Numeric::*;
        match self {
            Welcome { network, id } => {
                format!(":Welcome to the {network} Internet Relay Network {id}")
            }
            YourHost { server, version } => {
                format!(":Your host is {server}, running {version}")
            }
            Created { date } => format!(":This server was created {date}"),
            MyInfo { server, version } => format!(
                "{server} {version} {} {}",
                crate::modes::SUPPORTED_USER_MODES,
                crate::modes::SUPPORTED_CHANNEL_MODES
            ),
            UModeIs { modes } => (*modes).to_owned(),
            LUserClient { users, invisible, servers } => format!(
                ":There are {users} users and {invisible} invisible on {servers} servers"
            ),
            LUserOp { count } => format!("{count} :operator(s) online"),
            LUserUnknown { count } => format!("{count} :unknown connection(s)"),
            LUserChannels { count } => format!("{count} :channels formed"),
            LUserMe { clients, servers } => {
                format!(":I have {clients} clients and {servers} servers")
            }
            Away { nick, message } => format!("{nick} :{message}"),
            IsOn { nicks } => format!(":{nicks}"),
            UnAway => ":You are no longer marked as being away".to_owned(),
            NowAway => ":You have been marked as being away".to_owned(),
            WhoisUser { nick, user, host, realname } => {
                format!("{nick} {user} {host} * :{realname}")
            }
            WhoisServer { nick, server, info } => format!("{nick} {server} :{info}"),
            WhoisOperator { nick } => format!("{nick} :is an IRC operator"),
            WhoisIdle { nick, idle, signon } => {
                format!("{nick} {idle} {signon} :seconds idle, signon time")
            }
            WhoisSecure { nick } => format!("{nick} :is using a secure connection"),
            WhoisLoggedIn { nick, account } => format!("{nick} {account} :is logged in as"),
            EndOfWhois { nick } => format!("{nick} :End of WHOIS list"),
            WhoWasUser { nick, user, host, realname } => {
                format!("{nick} {user} {host} * :{realname}")
            }
            EndOfWhoWas { nick } => format!("{nick} :End of WHOWAS"),
            WhoReply { channel, user, host, server, nick, flags, hops, realname } => {
                format!("{channel} {user} {host} {server} {nick} {flags} :{hops} {realname}")
            }
            EndOfWho { name } => format!("{name} :End of WHO list"),
            List { channel, visible, topic } => format!("{channel} {visible} :{topic}"),
            ListEnd => ":End of LIST".to_owned(),
            ChannelModeIs { channel, modes } => format!("{channel} {modes}"),
            NoTopic { channel } => format!("{channel} :No topic is set"),
            Topic { channel, topic } => format!("{channel} :{topic}"),
            Inviting { nick, channel } => format!("{nick} {channel}"),
            InviteList { channel, mask } => format!("{channel} {mask}"),
            EndOfInviteList { channel } => format!("{channel} :End of channel invite list"),
            ExceptList { channel, mask } => format!("{channel} {mask}"),
            EndOfExceptList { channel } => format!("{channel} :End of channel exception list"),
            BanList { channel, mask } => format!("{channel} {mask}"),
            EndOfBanList { channel } => format!("{channel} :End of channel ban list"),
            EndOfNames { channel } => format!("{channel} :End of NAMES list"),
            Version { version, server } => format!("{version} {server}"),
            Time { server, time } => format!("{server} :{time}"),
            MotdStart { server } => format!(":- {server} Message of the day - "),
            Motd { line } => format!(":- {line}"),
            EndOfMotd => ":End of MOTD command".to_owned(),
            YoureOper => ":You are now an IRC operator".to_owned(),
            Rehashing { config } => format!("{config} :Rehashing"),
            NoSuchNick { nick } => format!("{nick} :No such nick/channel"),
            NoSuchServer { server } => format!("{server} :No such server"),
            NoSuchChannel { channel } => format!("{channel} :No such channel"),
            CannotSendToChan { channel } => format!("{channel} :Cannot send to channel"),
            WasNoSuchNick { nick } => format!("{nick} :There was no such nickname"),
            InvalidCapCmd { sub } => format!("{sub} :Invalid CAP subcommand"),
            UnknownCommand { command } => format!("{command} :Unknown command"),
            NoMotd => ":MOTD File is missing".to_owned(),
            NoNicknameGiven => ":No nickname given".to_owned(),
            ErroneusNickname { nick } => format!("{nick} :Erroneous nickname"),
            NicknameInUse { nick } => format!("{nick} :Nickname is already in use"),
            UserNotInChannel { nick, channel } => {
                format!("{nick} {channel} :They aren't on that channel")
            }
            NotOnChannel { channel } => format!("{channel} :You're not on that channel"),
            UserOnChannel { nick, channel } => format!("{nick} {channel} :is already on channel"),
            NeedMoreParams { command } => format!("{command} :Not enough parameters"),
            AlreadyRegistered => ":You may not reregister".to_owned(),
            PasswdMismatch => ":Password incorrect".to_owned(),
            ChannelIsFull { channel } => format!("{channel} :Cannot join channel (+l)"),
            UnknownMode { mode, channel } => {
                format!("{mode} :is unknown mode char to me for {channel}")
            }
            InviteOnlyChan { channel } => format!("{channel} :Cannot join channel (+i)"),
            BannedFromChan { channel } => format!("{channel} :Cannot join channel (+b)"),
            BadChannelKey { channel } => format!("{channel} :Cannot join channel (+k)"),
            NoPrivileges => ":Permission Denied".to_owned(),
            ChanOPrivsNeeded { channel } => format!("{channel} :You're not channel operator"),
            UModeUnknownFlag => ":Unknown MODE flag".to_owned(),
            UsersDontMatch => ":Cannot change mode for other users".to_owned(),
            LoggedIn { id, account } => {
                format!("{id} {account} :You are now logged in as {account}")
            }
            SaslSuccess => ":SASL authentication successful".to_owned(),
            SaslFail { reason } => format!(":SASL authentication failed: {reason}"),
            SaslTooLong => ":SASL message too long".to_owned(),
            SaslAborted => ":SASL authentication aborted".to_owned(),
            SaslAlready => ":You have already authenticated using SASL".to_owned(),
            SaslMechs { mechs } => format!("{mechs} :are available SASL mechanisms"),
        }
    }
}

/// Render a numeric reply addressed to `nick` (`*` before a nick exists).
pub fn numeric(server: &str, nick: &str, reply: &Numeric<'_>) -> String {
    truncate_line(format!(":{server} {:03} {nick} {}", reply.code(), reply.payload()))
}

/// Render a string reply; `source` is a server name or a `nick!user@host`
/// prefix, elided entirely when absent.
pub fn string_reply(source: Option<&str>, code: &str, payload: &str) -> String {
    truncate_line(match source {
        Some(source) => format!(":{source} {code} {payload}"),
        None => format!("{code} {payload}"),
    })
}

fn truncate_line(mut line: String) -> String {
    if line.len() > MAX_REPLY_LEN {
        // cut on a char boundary at or below the limit
        let mut end = MAX_REPLY_LEN;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
    }
    line
}

/// Pack space-delimited names into as few numeric replies as fit in the
/// 512-byte line limit. `head` is the fixed payload prefix repeated on each
/// chunk (for example `= #chan :`).
pub fn multiline(server: &str, nick: &str, code: u16, head: &str, names: &[String]) -> Vec<String> {
    let base = format!(":{server} {code:03} {nick} {head}");
    let budget = MAX_REPLY_LEN.saturating_sub(base.len());

    let mut lines = Vec::new();
    let mut chunk = String::new();
    for name in names {
        let extra = if chunk.is_empty() { name.len() } else { name.len() + 1 };
        if !chunk.is_empty() && chunk.len() + extra > budget {
            lines.push(truncate_line(format!("{base}{chunk}")));
            chunk.clear();
        }
        if !chunk.is_empty() {
            chunk.push(' ');
        }
        chunk.push_str(name);
    }
    if !chunk.is_empty() || lines.is_empty() {
        lines.push(truncate_line(format!("{base}{chunk}")));
    }
    lines
}

//
// string replies
//

pub fn privmsg(prefix: &str, target: &str, message: &Text) -> String {
    string_reply(Some(prefix), "PRIVMSG", &format!("{target} :{message}"))
}

pub fn notice(prefix: &str, target: &str, message: &Text) -> String {
    string_reply(Some(prefix), "NOTICE", &format!("{target} :{message}"))
}

pub fn nick_change(prefix: &str, new_nick: &str) -> String {
    string_reply(Some(prefix), "NICK", new_nick)
}

pub fn join(prefix: &str, channel: &str) -> String {
    string_reply(Some(prefix), "JOIN", channel)
}

pub fn part(prefix: &str, channel: &str, message: &Text) -> String {
    string_reply(Some(prefix), "PART", &format!("{channel} :{message}"))
}

pub fn kick(prefix: &str, channel: &str, target: &str, comment: &Text) -> String {
    string_reply(Some(prefix), "KICK", &format!("{channel} {target} :{comment}"))
}

pub fn topic_change(prefix: &str, channel: &str, topic: &str) -> String {
    string_reply(Some(prefix), "TOPIC", &format!("{channel} :{topic}"))
}

pub fn user_mode_change(prefix: &str, target: &str, changes: &str) -> String {
    string_reply(Some(prefix), "MODE", &format!("{target} :{changes}"))
}

pub fn channel_mode_change(prefix: &str, channel: &str, changes: &str) -> String {
    string_reply(Some(prefix), "MODE", &format!("{channel} {changes}"))
}

pub fn invite(prefix: &str, invitee: &str, channel: &str) -> String {
    string_reply(Some(prefix), "INVITE", &format!("{invitee} :{channel}"))
}

pub fn ping(server: &str) -> String {
    string_reply(None, "PING", &format!(":{server}"))
}

pub fn pong(server: &str, origin: &str) -> String {
    string_reply(Some(server), "PONG", &format!("{server} :{origin}"))
}

pub fn quit(prefix: &str, message: &Text) -> String {
    string_reply(Some(prefix), "QUIT", &format!(":{message}"))
}

pub fn error_line(message: &str) -> String {
    string_reply(None, "ERROR", &format!(":{message}"))
}

pub fn cap(server: &str, nick: &str, sub: &str, arg: &str) -> String {
    // the server prefix keeps old clients that mis-parse unprefixed CAP alive
    string_reply(Some(server), "CAP", &format!("{nick} {sub} :{arg}"))
}

pub fn authenticate(server: &str, arg: &str) -> String {
    string_reply(Some(server), "AUTHENTICATE", arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_envelope() {
        let line = numeric("irc.example.com", "alice", &Numeric::NoMotd);
        assert_eq!(line, ":irc.example.com 422 alice :MOTD File is missing");
    }

    #[test]
    fn numeric_codes_are_zero_padded() {
        let line = numeric("srv", "alice", &Numeric::Welcome { network: "Net", id: "alice!a@h" });
        assert!(line.starts_with(":srv 001 alice :Welcome to the Net"));
    }

    #[test]
    fn unregistered_target_is_star() {
        let line = numeric("srv", "*", &Numeric::NicknameInUse { nick: "alice" });
        assert_eq!(line, ":srv 433 * alice :Nickname is already in use");
    }

    #[test]
    fn string_reply_source_elision() {
        assert_eq!(ping("srv"), "PING :srv");
        assert_eq!(
            privmsg("alice!a@h", "bob", &Text::plain("hi")),
            ":alice!a@h PRIVMSG bob :hi"
        );
    }

    #[test]
    fn lines_never_exceed_the_limit() {
        let long = "x".repeat(600);
        let line = numeric("srv", "alice", &Numeric::Motd { line: &long });
        assert!(line.len() <= MAX_REPLY_LEN);
    }

    #[test]
    fn multiline_packs_greedily() {
        let names: Vec<String> = (0..100).map(|i| format!("member{i:03}")).collect();
        let lines = multiline("srv", "alice", RPL_NAMREPLY, "= #big :", &names);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.len() <= MAX_REPLY_LEN, "line too long: {}", line.len());
            assert!(line.starts_with(":srv 353 alice = #big :"));
        }
        // no member lost or duplicated
        let mut seen = Vec::new();
        for line in &lines {
            let tail = line.rsplit(':').next().unwrap();
            seen.extend(tail.split(' ').map(str::to_owned));
        }
        assert_eq!(seen, names);
    }

    #[test]
    fn multiline_emits_one_line_for_empty_lists() {
        let lines = multiline("srv", "alice", RPL_NAMREPLY, "= #empty :", &[]);
        assert_eq!(lines, vec![":srv 353 alice = #empty :".to_owned()]);
    }

    #[test]
    fn oversized_single_name_is_clamped() {
        let huge = vec!["y".repeat(600)];
        let lines = multiline("srv", "alice", RPL_NAMREPLY, "= #c :", &huge);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].len() <= MAX_REPLY_LEN);
    }
}
