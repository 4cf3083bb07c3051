//! The registration handshake: PASS, NICK, USER, CAP negotiation, SASL
//! PLAIN, and the welcome burst once the state machine completes.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;

use crate::auth::compare_password;
use crate::client::{CapState, Capability, ClientRef, SUPPORTED_CAPS, SaslSession};
use crate::commands::CapSubCommand;
use crate::constants::SASL_CHUNK_LEN;
use crate::lookup::WhoWas;
use crate::metrics;
use crate::modes::UserMode;
use crate::names::{Name, Text};
use crate::replies::{self, Numeric, numeric};
use crate::server::{Server, full_version};

// 3.1.1 Password message
//
//    The optional password can and MUST be set before any attempt to
//    register the connection is made.

pub async fn pass(server: &Arc<Server>, client: &ClientRef, password: &str) {
    let hash = server.password.read().await.clone();
    match hash {
        None => client.state.write().await.authorized = true,
        Some(hash) => {
            if compare_password(&hash, password).is_ok() {
                client.state.write().await.authorized = true;
            } else {
                server.send_numeric(client, Numeric::PasswdMismatch).await;
                server.quit_client(client, &Text::plain("bad password")).await;
            }
        }
    }
}

// 3.1.2 Nick message
//
//    NICK command is used to give user a nickname or change the existing
//    one.

pub async fn nick(server: &Arc<Server>, client: &ClientRef, nickname: Name) {
    if !nickname.is_valid_nickname() {
        server
            .send_numeric(client, Numeric::ErroneusNickname { nick: nickname.display() })
            .await;
        return;
    }
    if let Some(existing) = server.clients.get(nickname.folded()) {
        if existing.id != client.id {
            server
                .send_numeric(client, Numeric::NicknameInUse { nick: nickname.display() })
                .await;
            return;
        }
        if client.state.read().await.nick.as_ref().map(|n| n.display().to_owned())
            == Some(nickname.display().to_owned())
        {
            return; // same nick, same casing: nothing to do
        }
    }

    if client.is_registered().await {
        rename(server, client, nickname).await;
    } else {
        let previous = client.state.write().await.nick.replace(nickname.clone());
        if let Some(previous) = previous {
            server.clients.remove(&previous, client.id);
        }
        server.clients.add(&nickname, client.clone());
        try_register(server, client).await;
    }
}

/// Nick change by a registered client: who-was snapshot, index rename, and
/// one NICK broadcast to the client plus every channel-mate. The indexes
/// are updated before anything is sent, so no observer sees both nicks.
async fn rename(server: &Arc<Server>, client: &ClientRef, nickname: Name) {
    let old_profile = client.profile().await;
    let channels = {
        let mut state = client.state.write().await;
        let Some(old_nick) = state.nick.clone() else {
            return; // registered clients always have a nick
        };
        server.whowas.write().await.append(WhoWas {
            nickname: old_nick.clone(),
            username: state.username.clone(),
            hostname: state.hostname.clone(),
            hostmask: state.hostmask.clone(),
            realname: state.realname.clone(),
        });
        state.nick = Some(nickname.clone());
        server.clients.rename(&old_nick, &nickname, client.clone());
        state.channels.iter().cloned().collect::<Vec<_>>()
    };

    let line = replies::nick_change(&old_profile.prefix, nickname.display());
    let mut recipients = vec![client.clone()];
    let mut seen = std::collections::HashSet::from([client.id]);
    for name in channels {
        if let Some(channel) = server.channels.get(name.folded()) {
            for (member, _) in channel.members_snapshot().await {
                if seen.insert(member.id) {
                    recipients.push(member);
                }
            }
        }
    }
    for recipient in recipients {
        recipient.send(line.clone());
    }
}

// 3.1.3 User message
//
//    The USER command is used at the beginning of connection to specify
//    the username, hostname and realname of a new user. The <mode>
//    parameter is a bitmask: bit 2 sets 'w', bit 3 sets 'i'.

pub async fn user(
    server: &Arc<Server>,
    client: &ClientRef,
    username: Name,
    mode: u8,
    realname: Text,
) {
    if !client.state.read().await.authorized {
        server.send_numeric(client, Numeric::PasswdMismatch).await;
        server.quit_client(client, &Text::plain("bad password")).await;
        return;
    }

    let flags_applied = {
        let mut state = client.state.write().await;
        state.username = username.display().to_owned();
        state.realname = realname.to_string();
        let mut applied = false;
        if mode & 4 == 4 {
            state.modes.set(UserMode::WallOps);
            applied = true;
        }
        if mode & 8 == 8 {
            state.modes.set(UserMode::Invisible);
            applied = true;
        }
        applied.then(|| state.modes.to_string())
    };
    if let Some(modes) = flags_applied {
        server.send_numeric(client, Numeric::UModeIs { modes: &modes }).await;
    }

    try_register(server, client).await;
}

/// Enter REGISTERED once NICK and USER have both arrived and CAP
/// negotiation is not suspending the burst, then send 001–004, the LUSERS
/// numerics and the MOTD.
pub async fn try_register(server: &Arc<Server>, client: &ClientRef) {
    {
        let mut state = client.state.write().await;
        if state.registered
            || state.nick.is_none()
            || state.username.is_empty()
            || state.cap_state == CapState::Negotiating
        {
            return;
        }
        state.registered = true;
    }
    metrics::REGISTERED.set(server.clients.count() as i64);

    let profile = client.profile().await;
    let (sname, network) = {
        let info = server.info.read().await;
        (info.name.clone(), info.network.clone())
    };
    let version = full_version();

    client.send(numeric(
        &sname,
        &profile.nick,
        &Numeric::Welcome { network: &network, id: &profile.prefix },
    ));
    client.send(numeric(
        &sname,
        &profile.nick,
        &Numeric::YourHost { server: &sname, version: &version },
    ));
    client.send(numeric(
        &sname,
        &profile.nick,
        &Numeric::Created { date: &server.created_date() },
    ));
    client.send(numeric(
        &sname,
        &profile.nick,
        &Numeric::MyInfo { server: &sname, version: &version },
    ));

    server.lusers_to(client).await;
    server.motd_to(client).await;
}

// IRCv3 capability negotiation. CAP LS or CAP REQ before registration
// suspends the welcome burst until CAP END.

pub async fn cap(
    server: &Arc<Server>,
    client: &ClientRef,
    sub: Option<CapSubCommand>,
    raw_sub: &str,
    caps: &[String],
) {
    let sname = server.server_name().await;
    let nick = client.nick_or_star().await;

    let Some(sub) = sub else {
        server.send_numeric(client, Numeric::InvalidCapCmd { sub: raw_sub }).await;
        return;
    };

    match sub {
        CapSubCommand::Ls => {
            suspend_registration(client).await;
            client.send(replies::cap(&sname, &nick, "LS", SUPPORTED_CAPS));
        }
        CapSubCommand::List => {
            let enabled = {
                let state = client.state.read().await;
                let mut names: Vec<&str> =
                    state.caps.iter().map(|cap| cap.name()).collect();
                names.sort_unstable();
                names.join(" ")
            };
            client.send(replies::cap(&sname, &nick, "LIST", &enabled));
        }
        CapSubCommand::Req => {
            suspend_registration(client).await;
            let requested: Option<Vec<Capability>> =
                caps.iter().map(|name| Capability::from_name(name)).collect();
            let echo = caps.join(" ");
            match requested {
                Some(capabilities) => {
                    let mut state = client.state.write().await;
                    for capability in capabilities {
                        state.caps.insert(capability);
                    }
                    drop(state);
                    client.send(replies::cap(&sname, &nick, "ACK", &echo));
                }
                None => client.send(replies::cap(&sname, &nick, "NAK", &echo)),
            }
        }
        CapSubCommand::End => {
            client.state.write().await.cap_state = CapState::Negotiated;
            try_register(server, client).await;
        }
    }
}

async fn suspend_registration(client: &ClientRef) {
    let mut state = client.state.write().await;
    if !state.registered {
        state.cap_state = CapState::Negotiating;
    }
}

// SASL PLAIN. `AUTHENTICATE PLAIN` opens a session; the payload is
// base64("authcid \0 authzid \0 password"), `*` aborts, a chunk of exactly
// 400 bytes means more follows.

pub async fn authenticate(server: &Arc<Server>, client: &ClientRef, arg: &str) {
    if !client.state.read().await.authorized {
        server.send_numeric(client, Numeric::PasswdMismatch).await;
        server.quit_client(client, &Text::plain("bad password")).await;
        return;
    }
    if client.state.read().await.account.is_some() {
        server.send_numeric(client, Numeric::SaslAlready).await;
        return;
    }
    if arg == "*" {
        client.state.write().await.sasl = SaslSession::Inactive;
        server.send_numeric(client, Numeric::SaslAborted).await;
        return;
    }

    let sname = server.server_name().await;
    let session = client.state.read().await.sasl.clone();
    match session {
        SaslSession::Inactive => {
            if arg == "PLAIN" {
                client.state.write().await.sasl = SaslSession::InProgress(String::new());
                client.send(replies::authenticate(&sname, "+"));
            } else {
                server.send_numeric(client, Numeric::SaslMechs { mechs: "PLAIN" }).await;
                server
                    .send_numeric(
                        client,
                        Numeric::SaslFail { reason: "Unknown authentication mechanism" },
                    )
                    .await;
            }
        }
        SaslSession::InProgress(buffer) => {
            if arg.len() > SASL_CHUNK_LEN {
                server.send_numeric(client, Numeric::SaslTooLong).await;
                return;
            }
            if arg.len() == SASL_CHUNK_LEN {
                client.state.write().await.sasl =
                    SaslSession::InProgress(format!("{buffer}{arg}"));
                return;
            }

            let blob =
                if arg == "+" { buffer } else { format!("{buffer}{arg}") };
            client.state.write().await.sasl = SaslSession::Inactive;
            finish_plain(server, client, &blob).await;
        }
    }
}

async fn finish_plain(server: &Arc<Server>, client: &ClientRef, blob: &str) {
    let Ok(decoded) = BASE64.decode(blob) else {
        server
            .send_numeric(client, Numeric::SaslFail { reason: "Invalid base64 encoding" })
            .await;
        return;
    };

    let tokens: Vec<&[u8]> = decoded.split(|byte| *byte == 0).collect();
    let &[authcid, authzid, password] = tokens.as_slice() else {
        server
            .send_numeric(client, Numeric::SaslFail { reason: "invalid authentication blob" })
            .await;
        return;
    };
    let authcid = String::from_utf8_lossy(authcid).into_owned();
    let authzid = String::from_utf8_lossy(authzid).into_owned();
    let password = String::from_utf8_lossy(password).into_owned();
    if !authzid.is_empty() && authzid != authcid {
        server
            .send_numeric(
                client,
                Numeric::SaslFail { reason: "authzid and authcid should be the same" },
            )
            .await;
        return;
    }

    if server.accounts.read().await.verify(&authcid, &password).is_err() {
        debug!("[{}] SASL failure for account {authcid}", client.id);
        server
            .send_numeric(client, Numeric::SaslFail { reason: "invalid authentication" })
            .await;
        return;
    }

    {
        let mut state = client.state.write().await;
        state.account = Some(authcid.clone());
        state.modes.set(UserMode::Registered);
    }
    let profile = client.profile().await;
    server
        .send_numeric(client, Numeric::LoggedIn { id: &profile.prefix, account: &authcid })
        .await;
    server.send_numeric(client, Numeric::SaslSuccess).await;
    client.send(replies::user_mode_change(&profile.prefix, &profile.nick, "+R"));
}
