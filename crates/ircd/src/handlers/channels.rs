//! Channel commands: JOIN, PART, TOPIC, MODE, NAMES, LIST, INVITE, KICK.
//! The membership logic itself lives on [`crate::channel::Channel`]; these
//! handlers resolve names and keep the channels index consistent, in
//! particular destroying a channel the moment it empties.

use std::sync::Arc;

use crate::client::ClientRef;
use crate::commands::ChannelModeArg;
use crate::metrics;
use crate::names::{Name, Text};
use crate::replies::Numeric;
use crate::server::Server;

/// Drop a channel from the index when an operation emptied it.
async fn reap_if_empty(server: &Arc<Server>, name: &Name) {
    if let Some(channel) = server.channels.get(name.folded()) {
        if channel.is_empty().await {
            server.channels.remove(name);
            metrics::CHANNELS.set(server.channels.count() as i64);
        }
    }
}

pub async fn join(
    server: &Arc<Server>,
    client: &ClientRef,
    zero: bool,
    channels: Vec<(Name, Option<String>)>,
) {
    let sname = server.server_name().await;

    // JOIN 0: part every joined channel
    if zero {
        let nick = client.nick_or_star().await;
        let joined: Vec<Name> =
            client.state.read().await.channels.iter().cloned().collect();
        for name in joined {
            if let Some(channel) = server.channels.get(name.folded()) {
                if channel.part(&sname, client, &Text::plain(&nick)).await {
                    server.channels.remove(&name);
                }
            }
        }
        metrics::CHANNELS.set(server.channels.count() as i64);
        return;
    }

    for (name, key) in channels {
        if !name.is_valid_channel_name() {
            server
                .send_numeric(client, Numeric::NoSuchChannel { channel: name.display() })
                .await;
            continue;
        }
        let channel = server.channels.get_or_create(&name);
        channel.join(&sname, client, key.as_deref()).await;
        // a failed join of a channel created just now leaves it empty
        reap_if_empty(server, &name).await;
    }
    metrics::CHANNELS.set(server.channels.count() as i64);
}

pub async fn part(
    server: &Arc<Server>,
    client: &ClientRef,
    channels: Vec<Name>,
    message: Option<Text>,
) {
    let sname = server.server_name().await;
    let default = Text::plain(&client.nick_or_star().await);
    let message = message.unwrap_or(default);

    for name in channels {
        let Some(channel) = server.channels.get(name.folded()) else {
            server
                .send_numeric(client, Numeric::NoSuchChannel { channel: name.display() })
                .await;
            continue;
        };
        if channel.part(&sname, client, &message).await {
            server.channels.remove(&name);
            metrics::CHANNELS.set(server.channels.count() as i64);
        }
    }
}

pub async fn topic(
    server: &Arc<Server>,
    client: &ClientRef,
    channel_name: Name,
    topic: Option<Text>,
) {
    let sname = server.server_name().await;
    let Some(channel) = server.channels.get(channel_name.folded()) else {
        server
            .send_numeric(client, Numeric::NoSuchChannel { channel: channel_name.display() })
            .await;
        return;
    };
    match topic {
        Some(text) => channel.set_topic(&sname, client, &text).await,
        None => channel.get_topic(&sname, client).await,
    }
}

pub async fn channel_mode(
    server: &Arc<Server>,
    client: &ClientRef,
    channel_name: Name,
    changes: Vec<ChannelModeArg>,
) {
    let sname = server.server_name().await;
    let Some(channel) = server.channels.get(channel_name.folded()) else {
        server
            .send_numeric(client, Numeric::NoSuchChannel { channel: channel_name.display() })
            .await;
        return;
    };
    channel.apply_modes(server, &sname, client, &changes).await;
}

pub async fn names(server: &Arc<Server>, client: &ClientRef, channels: Vec<Name>) {
    let sname = server.server_name().await;

    if channels.is_empty() {
        // no arguments: every channel visible to the requester
        for channel in server.channels.all() {
            if channel.visible_to(client.id).await {
                channel.names_to(&sname, client).await;
            }
        }
        return;
    }

    for name in channels {
        let Some(channel) = server.channels.get(name.folded()) else {
            server
                .send_numeric(client, Numeric::NoSuchChannel { channel: name.display() })
                .await;
            continue;
        };
        channel.names_to(&sname, client).await;
    }
}

pub async fn list(
    server: &Arc<Server>,
    client: &ClientRef,
    channels: Vec<Name>,
    target: Option<Name>,
) {
    if let Some(target) = target {
        server
            .send_numeric(client, Numeric::NoSuchServer { server: target.display() })
            .await;
        return;
    }

    if channels.is_empty() {
        for channel in server.channels.all() {
            if !channel.visible_to(client.id).await {
                continue;
            }
            let (visible, topic) = channel.list_entry().await;
            server
                .send_numeric(
                    client,
                    Numeric::List { channel: channel.name.display(), visible, topic: &topic },
                )
                .await;
        }
    } else {
        for name in channels {
            let channel = server.channels.get(name.folded());
            match channel {
                Some(channel) if channel.visible_to(client.id).await => {
                    let (visible, topic) = channel.list_entry().await;
                    server
                        .send_numeric(
                            client,
                            Numeric::List {
                                channel: channel.name.display(),
                                visible,
                                topic: &topic,
                            },
                        )
                        .await;
                }
                _ => {
                    server
                        .send_numeric(client, Numeric::NoSuchChannel { channel: name.display() })
                        .await;
                }
            }
        }
    }
    server.send_numeric(client, Numeric::ListEnd).await;
}

pub async fn invite(server: &Arc<Server>, client: &ClientRef, nickname: Name, channel_name: Name) {
    let sname = server.server_name().await;
    let Some(target) = server.clients.get(nickname.folded()) else {
        server.send_numeric(client, Numeric::NoSuchNick { nick: nickname.display() }).await;
        return;
    };

    match server.channels.get(channel_name.folded()) {
        Some(channel) => channel.invite(&sname, client, &target).await,
        None => {
            // inviting into a channel that does not exist yet still
            // notifies both sides
            let profile = client.profile().await;
            let target_nick = target.nick_or_star().await;
            server
                .send_numeric(
                    client,
                    Numeric::Inviting { nick: &target_nick, channel: channel_name.display() },
                )
                .await;
            target.send(crate::replies::invite(
                &profile.prefix,
                &target_nick,
                channel_name.display(),
            ));
        }
    }
}

pub async fn kick(
    server: &Arc<Server>,
    client: &ClientRef,
    kicks: Vec<(Name, Name)>,
    comment: Option<Text>,
) {
    let sname = server.server_name().await;
    let default = Text::plain(&client.nick_or_star().await);
    let comment = comment.unwrap_or(default);

    for (channel_name, nickname) in kicks {
        let Some(channel) = server.channels.get(channel_name.folded()) else {
            server
                .send_numeric(client, Numeric::NoSuchChannel { channel: channel_name.display() })
                .await;
            continue;
        };
        let Some(target) = server.clients.get(nickname.folded()) else {
            server.send_numeric(client, Numeric::NoSuchNick { nick: nickname.display() }).await;
            continue;
        };
        if channel.kick(&sname, client, &target, &comment).await {
            server.channels.remove(&channel_name);
            metrics::CHANNELS.set(server.channels.count() as i64);
        }
    }
}
