use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::satisfy,
    combinator::{opt, recognize},
    multi::{many0, many1},
    sequence::{pair, preceded},
};

// 2.3.1 Message format in Augmented BNF
//
//    The protocol messages must be extracted from the contiguous stream of
//    octets.  The current solution is to designate two characters, CR and
//    LF, as message separators.  Empty messages are silently ignored,
//    which permits use of the sequence CR-LF between messages without
//    extra problems.
//
//     message    =  [ ":" prefix SPACE ] command [ params ] crlf
//     prefix     =  servername / ( nickname [ [ "!" user ] "@" host ] )
//     command    =  1*letter / 3digit
//     params     =  *14( SPACE middle ) [ SPACE ":" trailing ]
//                =/ 14( SPACE middle ) [ SPACE [ ":" ] trailing ]
//
//     nospcrlfcl =  %x01-09 / %x0B-0C / %x0E-1F / %x21-39 / %x3B-FF
//                     ; any octet except NUL, CR, LF, " " and ":"
//     middle     =  nospcrlfcl *( ":" / nospcrlfcl )
//     trailing   =  *( ":" / " " / nospcrlfcl )
//
//     SPACE      =  %x20        ; space character
//     crlf       =  %x0D %x0A   ; "carriage return" "linefeed"

/// A tokenized wire line: prefix discarded by the caller, uppercased
/// command code, positional arguments with the trailing argument last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub prefix: Option<String>,
    pub code: String,
    pub args: Vec<String>,
}

fn is_nospcrlfcl(c: char) -> bool {
    !matches!(c, '\0' | '\r' | '\n' | ' ' | ':')
}

fn spaces(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c == ' ').parse(input)
}

//  middle = nospcrlfcl *( ":" / nospcrlfcl )
fn middle(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_nospcrlfcl),
        many0(alt((tag(":"), take_while1(is_nospcrlfcl)))),
    ))
    .parse(input)
}

//  trailing = *( ":" / " " / nospcrlfcl )
fn trailing(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ':' || c == ' ' || is_nospcrlfcl(c)).parse(input)
}

//  command = 1*letter / 3digit
fn command(input: &str) -> IResult<&str, &str> {
    alt((
        take_while1(|c: char| c.is_ascii_alphabetic()),
        recognize(many1(satisfy(|c: char| c.is_ascii_digit()))),
    ))
    .parse(input)
}

//  prefix before the command; a single-node server discards it
fn prefix(input: &str) -> IResult<&str, &str> {
    preceded(tag(":"), take_while1(is_nospcrlfcl)).parse(input)
}

fn message(input: &str) -> IResult<&str, RawMessage> {
    let (rest, (pfx, code, args, trail)) = (
        opt((prefix, spaces)),
        command,
        many0(preceded(spaces, middle)),
        opt(preceded((spaces, tag(":")), trailing)),
    )
        .parse(input)?;

    let mut args: Vec<String> = args.into_iter().map(str::to_owned).collect();
    if let Some(trail) = trail {
        args.push(trail.to_owned());
    }
    Ok((
        rest,
        RawMessage {
            prefix: pfx.map(|(p, _)| p.to_owned()),
            code: code.to_uppercase(),
            args,
        },
    ))
}

/// Tokenize one line, CRLF and surrounding whitespace already trimmed.
/// Returns `None` for lines that do not even yield a command token.
pub fn parse_line(line: &str) -> Option<RawMessage> {
    match message(line) {
        Ok((_rest, msg)) => Some(msg),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(line: &str) -> RawMessage {
        parse_line(line).unwrap_or_else(|| panic!("should tokenize: {line:?}"))
    }

    #[test]
    fn plain_command() {
        let msg = parsed("LUSERS");
        assert_eq!(msg.code, "LUSERS");
        assert!(msg.args.is_empty());
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn command_is_uppercased() {
        assert_eq!(parsed("privmsg bob :hi").code, "PRIVMSG");
    }

    #[test]
    fn middle_and_trailing_arguments() {
        let msg = parsed("PRIVMSG #rust :hello :world");
        assert_eq!(msg.args, vec!["#rust", "hello :world"]);
    }

    #[test]
    fn trailing_may_be_empty() {
        let msg = parsed("TOPIC #rust :");
        assert_eq!(msg.args, vec!["#rust", ""]);
    }

    #[test]
    fn prefix_is_captured_then_ignored() {
        let msg = parsed(":nick!user@host JOIN #rust");
        assert_eq!(msg.prefix.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.code, "JOIN");
        assert_eq!(msg.args, vec!["#rust"]);
    }

    #[test]
    fn whitespace_runs_separate_tokens() {
        let msg = parsed("MODE   #rust  +k   secret");
        assert_eq!(msg.args, vec!["#rust", "+k", "secret"]);
    }

    #[test]
    fn colon_inside_middle_argument() {
        // a colon after the first octet does not start the trailing
        let msg = parsed("PING irc.example.com:6667");
        assert_eq!(msg.args, vec!["irc.example.com:6667"]);
    }

    #[test]
    fn numeric_command_code() {
        let msg = parsed("001 alice :Welcome");
        assert_eq!(msg.code, "001");
        assert_eq!(msg.args, vec!["alice", "Welcome"]);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_line("").is_none());
        assert!(parse_line(":").is_none());
    }

    #[test]
    fn tokenize_render_round_trip() {
        // parse(render(parse(line))) == parse(line)
        let lines = [
            "PRIVMSG #rust :hello there",
            "JOIN #a,#b key1,key2",
            "MODE #rust +kl secret 10",
            "NICK alice",
            "USER alice 0 * :Alice Liddell",
        ];
        for line in lines {
            let first = parsed(line);
            let mut rendered = first.code.clone();
            for (i, arg) in first.args.iter().enumerate() {
                let last = i == first.args.len() - 1;
                if last && (arg.contains(' ') || arg.is_empty() || arg.starts_with(':')) {
                    rendered.push_str(&format!(" :{arg}"));
                } else {
                    rendered.push_str(&format!(" {arg}"));
                }
            }
            assert_eq!(parsed(&rendered), first, "round trip of {line:?}");
        }
    }
}
