//! Protocol constants: numeric reply codes, line limits, timeouts.

use std::time::Duration;

/// Maximum wire line length including the trailing CRLF (RFC 2812 §2.3).
pub const MAX_LINE_LEN: usize = 512;
/// Maximum rendered reply length excluding CRLF.
pub const MAX_REPLY_LEN: usize = MAX_LINE_LEN - 2;

/// Folded nickname length limit.
pub const MAX_NICK_LEN: usize = 31;
/// Channel name length limit.
pub const MAX_CHANNEL_NAME_LEN: usize = 50;

/// Ban/except/invite mask lists stop growing past this; additions are
/// silently ignored.
pub const MAX_MASK_LIST_LEN: usize = 100;

/// Outbound reply queue depth; a full queue kills the client.
pub const REPLY_QUEUE_LEN: usize = 128;
/// Central dispatch queue depth; readers await capacity.
pub const DISPATCH_QUEUE_LEN: usize = 1024;

/// Silence before the server sends `PING :<server>`.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
/// Further silence after the PING before the client is killed.
pub const QUIT_TIMEOUT: Duration = Duration::from_secs(90);

/// A SASL payload of exactly this size means "more follows".
pub const SASL_CHUNK_LEN: usize = 400;

// Command responses (RFC 2812 §5.1)

pub const RPL_WELCOME: u16 = 1;
pub const RPL_YOURHOST: u16 = 2;
pub const RPL_CREATED: u16 = 3;
pub const RPL_MYINFO: u16 = 4;

pub const RPL_UMODEIS: u16 = 221;
pub const RPL_LUSERCLIENT: u16 = 251;
pub const RPL_LUSEROP: u16 = 252;
pub const RPL_LUSERUNKNOWN: u16 = 253;
pub const RPL_LUSERCHANNELS: u16 = 254;
pub const RPL_LUSERME: u16 = 255;

pub const RPL_AWAY: u16 = 301;
pub const RPL_ISON: u16 = 303;
pub const RPL_UNAWAY: u16 = 305;
pub const RPL_NOWAWAY: u16 = 306;
pub const RPL_WHOISUSER: u16 = 311;
pub const RPL_WHOISSERVER: u16 = 312;
pub const RPL_WHOISOPERATOR: u16 = 313;
pub const RPL_WHOWASUSER: u16 = 314;
pub const RPL_ENDOFWHO: u16 = 315;
pub const RPL_WHOISIDLE: u16 = 317;
pub const RPL_ENDOFWHOIS: u16 = 318;
pub const RPL_WHOISCHANNELS: u16 = 319;
pub const RPL_LIST: u16 = 322;
pub const RPL_LISTEND: u16 = 323;
pub const RPL_CHANNELMODEIS: u16 = 324;
pub const RPL_WHOISLOGGEDIN: u16 = 330;
pub const RPL_NOTOPIC: u16 = 331;
pub const RPL_TOPIC: u16 = 332;
pub const RPL_INVITING: u16 = 341;
pub const RPL_INVITELIST: u16 = 346;
pub const RPL_ENDOFINVITELIST: u16 = 347;
pub const RPL_EXCEPTLIST: u16 = 348;
pub const RPL_ENDOFEXCEPTLIST: u16 = 349;
pub const RPL_VERSION: u16 = 351;
pub const RPL_WHOREPLY: u16 = 352;
pub const RPL_NAMREPLY: u16 = 353;
pub const RPL_ENDOFNAMES: u16 = 366;
pub const RPL_BANLIST: u16 = 367;
pub const RPL_ENDOFBANLIST: u16 = 368;
pub const RPL_ENDOFWHOWAS: u16 = 369;
pub const RPL_MOTD: u16 = 372;
pub const RPL_MOTDSTART: u16 = 375;
pub const RPL_ENDOFMOTD: u16 = 376;
pub const RPL_YOUREOPER: u16 = 381;
pub const RPL_REHASHING: u16 = 382;
pub const RPL_TIME: u16 = 391;

// Error replies (RFC 2812 §5.2)

pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOSUCHSERVER: u16 = 402;
pub const ERR_NOSUCHCHANNEL: u16 = 403;
pub const ERR_CANNOTSENDTOCHAN: u16 = 404;
pub const ERR_WASNOSUCHNICK: u16 = 406;
pub const ERR_INVALIDCAPCMD: u16 = 410;
pub const ERR_UNKNOWNCOMMAND: u16 = 421;
pub const ERR_NOMOTD: u16 = 422;
pub const ERR_NONICKNAMEGIVEN: u16 = 431;
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
pub const ERR_NICKNAMEINUSE: u16 = 433;
pub const ERR_USERNOTINCHANNEL: u16 = 441;
pub const ERR_NOTONCHANNEL: u16 = 442;
pub const ERR_USERONCHANNEL: u16 = 443;
pub const ERR_NEEDMOREPARAMS: u16 = 461;
pub const ERR_ALREADYREGISTRED: u16 = 462;
pub const ERR_PASSWDMISMATCH: u16 = 464;
pub const ERR_CHANNELISFULL: u16 = 471;
pub const ERR_UNKNOWNMODE: u16 = 472;
pub const ERR_INVITEONLYCHAN: u16 = 473;
pub const ERR_BANNEDFROMCHAN: u16 = 474;
pub const ERR_BADCHANNELKEY: u16 = 475;
pub const ERR_NOPRIVILEGES: u16 = 481;
pub const ERR_CHANOPRIVSNEEDED: u16 = 482;
pub const ERR_UMODEUNKNOWNFLAG: u16 = 501;
pub const ERR_USERSDONTMATCH: u16 = 502;

pub const RPL_WHOISSECURE: u16 = 671;

// IRCv3 SASL numerics

pub const RPL_LOGGEDIN: u16 = 900;
pub const RPL_SASLSUCCESS: u16 = 903;
pub const ERR_SASLFAIL: u16 = 904;
pub const ERR_SASLTOOLONG: u16 = 905;
pub const ERR_SASLABORTED: u16 = 906;
pub const ERR_SASLALREADY: u16 = 907;
pub const RPL_SASLMECHS: u16 = 908;
