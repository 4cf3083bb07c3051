//! Connection upkeep and server queries: PING, user MODE, OPER, REHASH,
//! WALLOPS, KILL, VERSION, TIME.

use std::sync::Arc;

use crate::client::ClientRef;
use crate::commands::UserModeArg;
use crate::modes::{ModeChange, ModeOp, UserMode, render_mode_changes};
use crate::names::{Name, Text, fold};
use crate::replies::{self, Numeric};
use crate::server::{Server, full_version};

pub async fn ping(server: &Arc<Server>, client: &ClientRef, origin: Name) {
    let sname = server.server_name().await;
    client.send(replies::pong(&sname, origin.display()));
}

// 3.1.5 User mode message
//
//    A user MODE command MUST only be accepted if both the sender of the
//    message and the nickname given as a parameter are both the same.
//    Self-grants of +o and +O are ignored; 'a' only changes via AWAY.

pub async fn user_mode(
    server: &Arc<Server>,
    client: &ClientRef,
    nickname: Name,
    changes: Vec<UserModeArg>,
) {
    let own_nick = client.nick_or_star().await;
    if fold(&own_nick) != nickname.folded() {
        server.send_numeric(client, Numeric::UsersDontMatch).await;
        return;
    }

    if changes.is_empty() {
        let modes = client.state.read().await.modes.to_string();
        server.send_numeric(client, Numeric::UModeIs { modes: &modes }).await;
        return;
    }

    let parsed: Option<Vec<(ModeOp, UserMode)>> = changes
        .iter()
        .map(|change| UserMode::from_char(change.mode).map(|mode| (change.op, mode)))
        .collect();
    let Some(parsed) = parsed else {
        server.send_numeric(client, Numeric::UModeUnknownFlag).await;
        return;
    };

    let applied = {
        let mut state = client.state.write().await;
        let mut applied = Vec::new();
        for (op, mode) in parsed {
            match (op, mode) {
                // users cannot self-promote or toggle away via MODE
                (ModeOp::Add, UserMode::Operator | UserMode::LocalOperator) => continue,
                (_, UserMode::Away) => continue,
                (ModeOp::Add, mode) => {
                    if state.modes.set(mode) {
                        applied.push(ModeChange { mode, op: ModeOp::Add });
                    }
                }
                (ModeOp::Remove, mode) => {
                    if state.modes.unset(mode) {
                        applied.push(ModeChange { mode, op: ModeOp::Remove });
                    }
                }
                (ModeOp::List, _) => continue,
            }
        }
        applied
    };

    if !applied.is_empty() {
        let profile = client.profile().await;
        let rendered = render_mode_changes(&applied);
        client.send(replies::user_mode_change(&profile.prefix, &profile.nick, &rendered));
    }
}

pub async fn version(server: &Arc<Server>, client: &ClientRef, target: Option<Name>) {
    let sname = server.server_name().await;
    if let Some(target) = target {
        if fold(&sname) != target.folded() {
            server
                .send_numeric(client, Numeric::NoSuchServer { server: target.display() })
                .await;
            return;
        }
    }
    server
        .send_numeric(client, Numeric::Version { version: &full_version(), server: &sname })
        .await;
}

pub async fn time(server: &Arc<Server>, client: &ClientRef, target: Option<Name>) {
    let sname = server.server_name().await;
    if let Some(target) = target {
        if fold(&sname) != target.folded() {
            server
                .send_numeric(client, Numeric::NoSuchServer { server: target.display() })
                .await;
            return;
        }
    }
    let now = Server::format_time(chrono::Utc::now());
    server.send_numeric(client, Numeric::Time { server: &sname, time: &now }).await;
}

// 3.1.4 Oper message

pub async fn oper(server: &Arc<Server>, client: &ClientRef, name: Name, password: &str) {
    let allowed = server.operators.read().await.verify(name.display(), password).is_ok();
    if !allowed {
        server.send_numeric(client, Numeric::PasswdMismatch).await;
        return;
    }

    {
        let mut state = client.state.write().await;
        state.modes.set(UserMode::Operator);
        state.modes.set(UserMode::WallOps);
    }
    server.send_numeric(client, Numeric::YoureOper).await;
    let profile = client.profile().await;
    client.send(replies::user_mode_change(&profile.prefix, &profile.nick, "+ow"));
}

pub async fn rehash(server: &Arc<Server>, client: &ClientRef) {
    if !client.is_operator().await {
        server.send_numeric(client, Numeric::NoPrivileges).await;
        return;
    }

    let nick = client.nick_or_star().await;
    server.wallops(&format!("Rehashing server config ({nick})")).await;
    if let Err(err) = server.rehash().await {
        server.wallops(&format!("ERROR: Rehashing config failed ({err})")).await;
        return;
    }
    let config = server.config_path().display().to_string();
    server.send_numeric(client, Numeric::Rehashing { config: &config }).await;
}

// 4.7 Operwall message

pub async fn wallops(server: &Arc<Server>, client: &ClientRef, message: Text) {
    if !client.is_operator().await {
        server.send_numeric(client, Numeric::NoPrivileges).await;
        return;
    }
    server.wallops(&message.to_string()).await;
}

// 3.7.1 Kill message

pub async fn kill(server: &Arc<Server>, client: &ClientRef, nickname: Name, comment: Text) {
    if !client.is_operator().await {
        server.send_numeric(client, Numeric::NoPrivileges).await;
        return;
    }
    let Some(target) = server.clients.get(nickname.folded()) else {
        server.send_numeric(client, Numeric::NoSuchNick { nick: nickname.display() }).await;
        return;
    };

    let nick = client.nick_or_star().await;
    let reason = Text::plain(&format!("KILLed by {nick}: {comment}"));
    server.quit_client(&target, &reason).await;
}
