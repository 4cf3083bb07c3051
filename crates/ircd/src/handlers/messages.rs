//! Messaging and user-query commands: PRIVMSG, NOTICE, AWAY, ISON, WHO,
//! WHOIS, WHOWAS.

use std::collections::HashSet;
use std::sync::Arc;

use crate::client::{Capability, ClientId, ClientRef};
use crate::metrics;
use crate::modes::{ChannelMode, UserMode};
use crate::names::{Name, Text};
use crate::replies::{self, Numeric, multiline, numeric};
use crate::server::Server;

// 3.3.1 Private messages
//
//    PRIVMSG is used to send private messages between users, as well as to
//    send messages to channels.

pub async fn privmsg(
    server: &Arc<Server>,
    client: &ClientRef,
    target: Name,
    message: Text,
    notice: bool,
) {
    let sname = server.server_name().await;

    // operator NOTICE * reaches everyone
    if notice && target.display() == "*" {
        if client.is_operator().await {
            server.global_notice(&message.to_string()).await;
        } else {
            server.send_numeric(client, Numeric::NoPrivileges).await;
        }
        return;
    }

    if target.is_channel() {
        let Some(channel) = server.channels.get(target.folded()) else {
            server
                .send_numeric(client, Numeric::NoSuchChannel { channel: target.display() })
                .await;
            return;
        };
        channel.message(&sname, client, notice, &message).await;
        return;
    }

    let Some(recipient) = server.clients.get(target.folded()) else {
        server.send_numeric(client, Numeric::NoSuchNick { nick: target.display() }).await;
        return;
    };

    let profile = client.profile().await;
    let recipient_nick = recipient.nick_or_star().await;
    metrics::MESSAGES.inc();
    let line = if notice {
        replies::notice(&profile.prefix, &recipient_nick, &message)
    } else {
        replies::privmsg(&profile.prefix, &recipient_nick, &message)
    };
    recipient.send(line);

    if !notice {
        let away = recipient.state.read().await.away.clone();
        if let Some(away_message) = away {
            client.send(numeric(
                &sname,
                &profile.nick,
                &Numeric::Away { nick: &recipient_nick, message: &away_message },
            ));
        }
    }
}

// 4.1 Away

pub async fn away(server: &Arc<Server>, client: &ClientRef, text: Option<Text>) {
    let going_away = text.as_ref().is_some_and(|t| !t.is_empty());
    {
        let mut state = client.state.write().await;
        if going_away {
            state.modes.set(UserMode::Away);
            state.away = text.map(|t| t.to_string());
        } else {
            state.modes.unset(UserMode::Away);
            state.away = None;
        }
    }
    let reply = if going_away { Numeric::NowAway } else { Numeric::UnAway };
    server.send_numeric(client, reply).await;
}

// 4.9 Ison message

pub async fn ison(server: &Arc<Server>, client: &ClientRef, nicks: Vec<Name>) {
    let mut online = Vec::new();
    for nick in nicks {
        if let Some(found) = server.clients.get(nick.folded()) {
            if found.is_registered().await {
                online.push(found.nick_or_star().await);
            }
        }
    }
    server.send_numeric(client, Numeric::IsOn { nicks: &online.join(" ") }).await;
}

/// Clients sharing at least one channel with `client`; invisible users
/// are shown in WHO only to these.
async fn friends(server: &Arc<Server>, client: &ClientRef) -> HashSet<ClientId> {
    let mut friends = HashSet::from([client.id]);
    let channels: Vec<Name> = client.state.read().await.channels.iter().cloned().collect();
    for name in channels {
        if let Some(channel) = server.channels.get(name.folded()) {
            for (member, _) in channel.members_snapshot().await {
                friends.insert(member.id);
            }
        }
    }
    friends
}

async fn who_flags(
    target: &ClientRef,
    channel_modes: Option<&crate::modes::ModeSet<ChannelMode>>,
    multi_prefix: bool,
) -> String {
    let state = target.state.read().await;
    let mut flags =
        if state.modes.has(UserMode::Away) { "G".to_owned() } else { "H".to_owned() };
    if state.modes.has(UserMode::Operator) {
        flags.push('*');
    }
    drop(state);

    if let Some(modes) = channel_modes {
        let op = modes.has(ChannelMode::ChannelOperator);
        let voice = modes.has(ChannelMode::Voice);
        if multi_prefix {
            if op {
                flags.push('@');
            }
            if voice {
                flags.push('+');
            }
        } else if op {
            flags.push('@');
        } else if voice {
            flags.push('+');
        }
    }
    flags
}

// <channel> <user> <host> <server> <nick> ( "H" / "G" ) ["*"] [ ("@"/"+") ]
// :<hopcount> <realname>

pub async fn who(
    server: &Arc<Server>,
    client: &ClientRef,
    mask: Option<Name>,
    operator_only: bool,
) {
    let sname = server.server_name().await;
    let nick = client.nick_or_star().await;
    let viewer_is_oper = client.is_operator().await;
    let multi_prefix = client.has_cap(Capability::MultiPrefix).await;
    let friends = friends(server, client).await;

    let mut emit = Vec::new();
    match &mask {
        None => {
            for channel in server.channels.all() {
                if !channel.visible_to(client.id).await {
                    continue;
                }
                for (member, member_modes) in channel.members_snapshot().await {
                    emit.push((Some((channel.name.clone(), member_modes)), member));
                }
            }
        }
        Some(mask) if mask.is_channel() => {
            if let Some(channel) = server.channels.get(mask.folded()) {
                for (member, member_modes) in channel.members_snapshot().await {
                    emit.push((Some((channel.name.clone(), member_modes)), member));
                }
            }
        }
        Some(mask) => {
            for found in server.clients.find_all(mask).await {
                emit.push((None, found));
            }
        }
    }

    for (channel_info, target) in emit {
        let state = target.state.read().await;
        if !state.registered {
            continue;
        }
        if operator_only && !state.modes.has(UserMode::Operator) {
            continue;
        }
        // invisible members only show to clients sharing a channel
        if state.modes.has(UserMode::Invisible) && !friends.contains(&target.id) {
            continue;
        }
        let target_nick =
            state.nick.as_ref().map(|n| n.display().to_owned()).unwrap_or_default();
        let username = state.username.clone();
        let host = state.host_for(viewer_is_oper).to_owned();
        let realname = state.realname.clone();
        drop(state);

        let (channel_name, flags) = match &channel_info {
            Some((name, member_modes)) => (
                name.display().to_owned(),
                who_flags(&target, Some(member_modes), multi_prefix).await,
            ),
            None => ("*".to_owned(), who_flags(&target, None, multi_prefix).await),
        };
        client.send(numeric(
            &sname,
            &nick,
            &Numeric::WhoReply {
                channel: &channel_name,
                user: &username,
                host: &host,
                server: &sname,
                nick: &target_nick,
                flags: &flags,
                hops: 0,
                realname: &realname,
            },
        ));
    }

    let name = mask.as_ref().map(|m| m.display().to_owned()).unwrap_or_else(|| "*".to_owned());
    server.send_numeric(client, Numeric::EndOfWho { name: &name }).await;
}

// 3.6.2 Whois query

pub async fn whois(server: &Arc<Server>, client: &ClientRef, masks: Vec<Name>) {
    for mask in masks {
        let matches = server.clients.find_all(&mask).await;
        if matches.is_empty() {
            server.send_numeric(client, Numeric::NoSuchNick { nick: mask.display() }).await;
            continue;
        }
        for target in matches {
            whois_reply(server, client, &target).await;
        }
    }
}

async fn whois_reply(server: &Arc<Server>, client: &ClientRef, target: &ClientRef) {
    let sname = server.server_name().await;
    let nick = client.nick_or_star().await;
    let viewer_is_oper = client.is_operator().await;
    let description = server.info.read().await.description.clone();

    let (target_nick, username, host, realname, is_oper, is_secure, account, channel_names) = {
        let state = target.state.read().await;
        (
            state.nick.as_ref().map(|n| n.display().to_owned()).unwrap_or_default(),
            state.username.clone(),
            state.host_for(viewer_is_oper).to_owned(),
            state.realname.clone(),
            state.modes.has(UserMode::Operator),
            state.modes.has(UserMode::SecureConn),
            state.account.clone(),
            state.channels.iter().cloned().collect::<Vec<_>>(),
        )
    };

    client.send(numeric(
        &sname,
        &nick,
        &Numeric::WhoisUser {
            nick: &target_nick,
            user: &username,
            host: &host,
            realname: &realname,
        },
    ));
    if is_oper {
        client.send(numeric(&sname, &nick, &Numeric::WhoisOperator { nick: &target_nick }));
    }
    client.send(numeric(
        &sname,
        &nick,
        &Numeric::WhoisIdle {
            nick: &target_nick,
            idle: target.idle_seconds(),
            signon: target.signon,
        },
    ));

    // channels shared over the wire are the ones the viewer could see,
    // each with the target's status prefix
    let mut channel_entries = Vec::new();
    for name in channel_names {
        let Some(channel) = server.channels.get(name.folded()) else { continue };
        if !channel.visible_to(client.id).await {
            continue;
        }
        let prefix = match channel.member_modes(target.id).await {
            Some(modes) if modes.has(ChannelMode::ChannelOperator) => "@",
            Some(modes) if modes.has(ChannelMode::Voice) => "+",
            _ => "",
        };
        channel_entries.push(format!("{prefix}{}", channel.name.display()));
    }
    if !channel_entries.is_empty() {
        channel_entries.sort_unstable();
        let head = format!("{target_nick} :");
        client.send_all(multiline(
            &sname,
            &nick,
            crate::constants::RPL_WHOISCHANNELS,
            &head,
            &channel_entries,
        ));
    }

    if is_secure {
        client.send(numeric(&sname, &nick, &Numeric::WhoisSecure { nick: &target_nick }));
    }
    client.send(numeric(
        &sname,
        &nick,
        &Numeric::WhoisServer { nick: &target_nick, server: &sname, info: &description },
    ));
    if let Some(account) = account {
        client.send(numeric(
            &sname,
            &nick,
            &Numeric::WhoisLoggedIn { nick: &target_nick, account: &account },
        ));
    }
    client.send(numeric(&sname, &nick, &Numeric::EndOfWhois { nick: &target_nick }));
}

// 3.6.3 Whowas

pub async fn whowas(
    server: &Arc<Server>,
    client: &ClientRef,
    nicknames: Vec<Name>,
    count: Option<i64>,
) {
    let viewer_is_oper = client.is_operator().await;
    let whowas = server.whowas.read().await;
    for nickname in nicknames {
        let results = whowas.find(&nickname, count.unwrap_or(0));
        if results.is_empty() {
            server
                .send_numeric(client, Numeric::WasNoSuchNick { nick: nickname.display() })
                .await;
        } else {
            for entry in &results {
                let host = if viewer_is_oper { &entry.hostname } else { &entry.hostmask };
                server
                    .send_numeric(
                        client,
                        Numeric::WhoWasUser {
                            nick: entry.nickname.display(),
                            user: &entry.username,
                            host,
                            realname: &entry.realname,
                        },
                    )
                    .await;
            }
        }
        server
            .send_numeric(client, Numeric::EndOfWhoWas { nick: nickname.display() })
            .await;
    }
}
