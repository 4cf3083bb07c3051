use std::fmt;
use std::hash::{Hash, Hasher};

use nom::{
    IResult, Parser,
    bytes::complete::take_while,
    character::complete::satisfy,
    combinator::{recognize, verify},
    sequence::pair,
};
use regex::Regex;

use crate::constants::{MAX_CHANNEL_NAME_LEN, MAX_NICK_LEN};

/// Fold one byte of a name per RFC 2812 casemapping: ASCII uppercase maps
/// to lowercase and `[]\~` map to `{}|^`.
fn fold_char(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

pub fn fold(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

/// A case-folded identifier: nickname, channel name, server name or mask.
/// Equality and hashing use the folded form; the original casing is kept
/// for display.
#[derive(Debug, Clone)]
pub struct Name {
    display: String,
    folded: String,
}

impl Name {
    pub fn new(s: &str) -> Self {
        Name {
            display: s.to_owned(),
            folded: fold(s),
        }
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// A name denotes a channel iff it begins with `#` or `&`.
    pub fn is_channel(&self) -> bool {
        self.display.starts_with('#') || self.display.starts_with('&')
    }

    pub fn is_valid_nickname(&self) -> bool {
        matches!(nickname(&self.display), Ok((rest, _)) if rest.is_empty())
            && self.folded.len() <= MAX_NICK_LEN
    }

    pub fn is_valid_channel_name(&self) -> bool {
        matches!(channel_name(&self.display), Ok((rest, _)) if rest.is_empty())
    }

    /// Glob match against this name used as a pattern: `*` matches any run,
    /// `?` matches a single character. Matching is case-folded.
    pub fn matches(&self, candidate: &str) -> bool {
        wild_match(&self.folded, &fold(candidate))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state)
    }
}

/// Compile a glob mask into an anchored regex over the folded alphabet.
fn wild_match(pattern: &str, candidate: &str) -> bool {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    match Regex::new(&expr) {
        Ok(re) => re.is_match(candidate),
        Err(_) => false,
    }
}

// 2.3.1 Message format in Augmented BNF
//
//   nickname   =  ( letter / special ) *( letter / digit / special / "-" )
//   special    =  %x5B-60 / %x7B-7D
//                   ; "[", "]", "\", "`", "_", "^", "{", "|", "}"

fn is_nick_special(c: char) -> bool {
    "[]\\`_^{|}".contains(c)
}

fn is_nick_first_char(c: char) -> bool {
    c.is_ascii_alphabetic() || is_nick_special(c)
}

fn is_nick_tail_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || is_nick_special(c) || c == '-'
}

pub fn nickname(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(satisfy(is_nick_first_char), take_while(is_nick_tail_char))),
        |s: &str| fold(s).len() <= MAX_NICK_LEN,
    )
    .parse(input)
}

//   channel    =  ( "#" / "&" ) chanstring
//   chanstring =  any octet except NUL, BELL, CR, LF, " " and ","

fn is_chanstring_char(c: char) -> bool {
    !matches!(c, '\0' | '\x07' | '\r' | '\n' | ' ' | ',')
}

pub fn channel_name(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            satisfy(|c| c == '#' || c == '&'),
            take_while(is_chanstring_char),
        )),
        |s: &str| s.len() >= 2 && s.len() <= MAX_CHANNEL_NAME_LEN,
    )
    .parse(input)
}

/// An opaque message body: UTF-8, no embedded CR, LF or NUL. The `Action`
/// variant carries a CTCP ACTION body, delimited by `\x01` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Text {
    Plain(String),
    Action(String),
}

fn sanitize(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect()
}

impl Text {
    pub fn new(s: &str) -> Self {
        let s = sanitize(s);
        if let Some(body) = s
            .strip_prefix("\x01ACTION ")
            .and_then(|rest| rest.strip_suffix('\x01'))
        {
            Text::Action(body.to_owned())
        } else {
            Text::Plain(s)
        }
    }

    pub fn plain(s: &str) -> Self {
        Text::Plain(sanitize(s))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Text::Plain(s) | Text::Action(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Text::Plain(s) => f.write_str(s),
            Text::Action(s) => write!(f, "\x01ACTION {s}\x01"),
        }
    }
}
