//! User and channel mode sets plus the mode-change values that MODE
//! commands parse into and replies render from.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

// 3.1.5 User mode message
//
//    The available modes are as follows:
//
//         a - user is flagged as away;
//         i - marks a users as invisible;
//         w - user receives wallops;
//         r - restricted user connection;
//         o - operator flag;
//         O - local operator flag;
//         s - marks a user for receipt of server notices.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserMode {
    Away,
    Invisible,
    WallOps,
    Restricted,
    Operator,
    LocalOperator,
    ServerNotice,
    /// `+x`: show the derived hostmask instead of the real host.
    HostMask,
    /// `+R`: identified to an account via SASL.
    Registered,
    /// `+Z`: connected over TLS.
    SecureConn,
}

impl UserMode {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'a' => UserMode::Away,
            'i' => UserMode::Invisible,
            'w' => UserMode::WallOps,
            'r' => UserMode::Restricted,
            'o' => UserMode::Operator,
            'O' => UserMode::LocalOperator,
            's' => UserMode::ServerNotice,
            'x' => UserMode::HostMask,
            'R' => UserMode::Registered,
            'Z' => UserMode::SecureConn,
            _ => return None,
        })
    }

    pub fn to_char(self) -> char {
        match self {
            UserMode::Away => 'a',
            UserMode::Invisible => 'i',
            UserMode::WallOps => 'w',
            UserMode::Restricted => 'r',
            UserMode::Operator => 'o',
            UserMode::LocalOperator => 'O',
            UserMode::ServerNotice => 's',
            UserMode::HostMask => 'x',
            UserMode::Registered => 'R',
            UserMode::SecureConn => 'Z',
        }
    }
}

impl fmt::Display for UserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

// 3.2.3 Channel mode message (and RFC 2811 §4)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Anonymous,
    InviteOnly,
    Moderated,
    NoOutside,
    Quiet,
    Private,
    Secret,
    ReOp,
    OpTopic,
    Key,
    UserLimit,
    BanMask,
    ExceptMask,
    InviteMask,
    ChannelOperator,
    Voice,
}

impl ChannelMode {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'a' => ChannelMode::Anonymous,
            'i' => ChannelMode::InviteOnly,
            'm' => ChannelMode::Moderated,
            'n' => ChannelMode::NoOutside,
            'q' => ChannelMode::Quiet,
            'p' => ChannelMode::Private,
            's' => ChannelMode::Secret,
            'r' => ChannelMode::ReOp,
            't' => ChannelMode::OpTopic,
            'k' => ChannelMode::Key,
            'l' => ChannelMode::UserLimit,
            'b' => ChannelMode::BanMask,
            'e' => ChannelMode::ExceptMask,
            'I' => ChannelMode::InviteMask,
            'o' => ChannelMode::ChannelOperator,
            'v' => ChannelMode::Voice,
            _ => return None,
        })
    }

    pub fn to_char(self) -> char {
        match self {
            ChannelMode::Anonymous => 'a',
            ChannelMode::InviteOnly => 'i',
            ChannelMode::Moderated => 'm',
            ChannelMode::NoOutside => 'n',
            ChannelMode::Quiet => 'q',
            ChannelMode::Private => 'p',
            ChannelMode::Secret => 's',
            ChannelMode::ReOp => 'r',
            ChannelMode::OpTopic => 't',
            ChannelMode::Key => 'k',
            ChannelMode::UserLimit => 'l',
            ChannelMode::BanMask => 'b',
            ChannelMode::ExceptMask => 'e',
            ChannelMode::InviteMask => 'I',
            ChannelMode::ChannelOperator => 'o',
            ChannelMode::Voice => 'v',
        }
    }

    /// Modes that consume one argument token when changed.
    pub fn takes_arg(self) -> bool {
        matches!(
            self,
            ChannelMode::Key
                | ChannelMode::UserLimit
                | ChannelMode::BanMask
                | ChannelMode::ExceptMask
                | ChannelMode::InviteMask
                | ChannelMode::ChannelOperator
                | ChannelMode::Voice
        )
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Mode letters advertised in RPL_MYINFO.
pub const SUPPORTED_USER_MODES: &str = "OZaiorswxR";
pub const SUPPORTED_CHANNEL_MODES: &str = "Ibaeiklmnopqrstv";

/// A set of mode flags with `has`/`set`/`unset`, rendered as `+<letters>`.
#[derive(Debug, Clone)]
pub struct ModeSet<M>(HashSet<M>);

impl<M> Default for ModeSet<M> {
    fn default() -> Self {
        ModeSet(HashSet::new())
    }
}

impl<M: Copy + Eq + Hash> ModeSet<M> {
    pub fn new() -> Self {
        ModeSet(HashSet::new())
    }

    pub fn has(&self, mode: M) -> bool {
        self.0.contains(&mode)
    }

    pub fn set(&mut self, mode: M) -> bool {
        self.0.insert(mode)
    }

    pub fn unset(&mut self, mode: M) -> bool {
        self.0.remove(&mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = M> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for ModeSet<UserMode> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars: Vec<char> = self.0.iter().map(|m| m.to_char()).collect();
        chars.sort_unstable();
        write!(f, "+{}", chars.into_iter().collect::<String>())
    }
}

// The channel set renders flag modes only; key/limit/list arguments live in
// the channel state and are appended by the caller when appropriate.
impl fmt::Display for ModeSet<ChannelMode> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars: Vec<char> = self.0.iter().map(|m| m.to_char()).collect();
        chars.sort_unstable();
        write!(f, "+{}", chars.into_iter().collect::<String>())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOp {
    Add,
    Remove,
    /// A bare mask-list mode with no operator queries the list.
    List,
}

impl fmt::Display for ModeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeOp::Add => f.write_str("+"),
            ModeOp::Remove => f.write_str("-"),
            ModeOp::List => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: UserMode,
    pub op: ModeOp,
}

/// Accepted user-mode changes coalesced into one `MODE` argument, grouping
/// consecutive changes that share an operator: `+ow`, `+o-w`.
pub fn render_mode_changes(changes: &[ModeChange]) -> String {
    let mut out = String::new();
    let mut current: Option<ModeOp> = None;
    for change in changes {
        if current != Some(change.op) {
            out.push_str(&change.op.to_string());
            current = Some(change.op);
        }
        out.push(change.mode.to_char());
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelModeChange {
    pub mode: ChannelMode,
    pub op: ModeOp,
    pub arg: Option<String>,
}

/// Accepted channel-mode changes coalesced into one `MODE` argument with
/// the argument tokens appended in change order: `+kl secret 10`.
pub fn render_channel_mode_changes(changes: &[ChannelModeChange]) -> String {
    let mut flags = String::new();
    let mut current: Option<ModeOp> = None;
    for change in changes {
        if current != Some(change.op) {
            flags.push_str(&change.op.to_string());
            current = Some(change.op);
        }
        flags.push(change.mode.to_char());
    }
    let mut out = flags;
    for change in changes {
        if let Some(arg) = &change.arg {
            out.push(' ');
            out.push_str(arg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_set_is_idempotent() {
        let mut modes = ModeSet::new();
        assert!(modes.set(UserMode::Operator));
        assert!(!modes.set(UserMode::Operator));
        assert!(modes.has(UserMode::Operator));
        assert!(modes.unset(UserMode::Operator));
        assert!(!modes.unset(UserMode::Operator));
        assert!(!modes.has(UserMode::Operator));
    }

    #[test]
    fn user_mode_set_renders_sorted() {
        let mut modes = ModeSet::new();
        modes.set(UserMode::WallOps);
        modes.set(UserMode::Invisible);
        modes.set(UserMode::Operator);
        assert_eq!(modes.to_string(), "+iow");
    }

    #[test]
    fn mode_char_round_trip() {
        for c in SUPPORTED_USER_MODES.chars() {
            let mode = UserMode::from_char(c).expect("supported user mode");
            assert_eq!(mode.to_char(), c);
        }
        for c in SUPPORTED_CHANNEL_MODES.chars() {
            let mode = ChannelMode::from_char(c).expect("supported channel mode");
            assert_eq!(mode.to_char(), c);
        }
        assert!(UserMode::from_char('Q').is_none());
        assert!(ChannelMode::from_char('z').is_none());
        // 'O' is a user mode only; as a channel mode it is unknown
        assert!(ChannelMode::from_char('O').is_none());
    }

    #[test]
    fn render_groups_consecutive_ops() {
        let changes = [
            ModeChange { mode: UserMode::Operator, op: ModeOp::Add },
            ModeChange { mode: UserMode::WallOps, op: ModeOp::Add },
            ModeChange { mode: UserMode::Invisible, op: ModeOp::Remove },
        ];
        assert_eq!(render_mode_changes(&changes), "+ow-i");
    }

    #[test]
    fn render_channel_changes_appends_args_in_order() {
        let changes = [
            ChannelModeChange {
                mode: ChannelMode::Key,
                op: ModeOp::Add,
                arg: Some("secret".to_owned()),
            },
            ChannelModeChange {
                mode: ChannelMode::UserLimit,
                op: ModeOp::Add,
                arg: Some("10".to_owned()),
            },
            ChannelModeChange {
                mode: ChannelMode::Moderated,
                op: ModeOp::Remove,
                arg: None,
            },
        ];
        assert_eq!(render_channel_mode_changes(&changes), "+kl-m secret 10");
    }

    #[test]
    fn arg_consuming_modes() {
        for c in "klovbeI".chars() {
            assert!(ChannelMode::from_char(c).unwrap().takes_arg(), "{c}");
        }
        for c in "aimnqpsrt".chars() {
            assert!(!ChannelMode::from_char(c).unwrap().takes_arg(), "{c}");
        }
    }
}
