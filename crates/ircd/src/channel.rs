//! Channel state and operations. A channel's members, modes, topic and
//! mask lists are guarded by one lock held for the whole duration of any
//! state transition, so membership invariants never show up half-applied.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::client::{Capability, ClientId, ClientRef};
use crate::commands::ChannelModeArg;
use crate::constants::MAX_MASK_LIST_LEN;
use crate::modes::{ChannelMode, ChannelModeChange, ModeOp, ModeSet, render_channel_mode_changes};
use crate::names::{Name, Text};
use crate::replies::{self, Numeric, numeric};
use crate::server::Server;

#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub mask: Name,
    pub set_by: String,
    pub set_at: i64,
}

struct Member {
    client: ClientRef,
    modes: ModeSet<ChannelMode>,
}

#[derive(Default)]
struct ChannelState {
    topic: Option<Topic>,
    key: Option<String>,
    user_limit: Option<usize>,
    modes: ModeSet<ChannelMode>,
    bans: Vec<ListEntry>,
    excepts: Vec<ListEntry>,
    invite_masks: Vec<ListEntry>,
    members: HashMap<ClientId, Member>,
    pending_invites: HashSet<ClientId>,
}

pub struct Channel {
    pub name: Name,
    state: RwLock<ChannelState>,
}

fn mask_list_matches(list: &[ListEntry], userhost: &str) -> bool {
    list.iter().any(|entry| entry.mask.matches(userhost))
}

/// Status prefix for one member: all of `@`/`+` under multi-prefix, the
/// highest otherwise.
fn status_prefix(modes: &ModeSet<ChannelMode>, multi_prefix: bool) -> String {
    let op = modes.has(ChannelMode::ChannelOperator);
    let voice = modes.has(ChannelMode::Voice);
    if multi_prefix {
        let mut prefix = String::new();
        if op {
            prefix.push('@');
        }
        if voice {
            prefix.push('+');
        }
        prefix
    } else if op {
        "@".to_owned()
    } else if voice {
        "+".to_owned()
    } else {
        String::new()
    }
}

impl Channel {
    pub fn new(name: Name) -> Self {
        Channel { name, state: RwLock::new(ChannelState::default()) }
    }

    pub async fn is_member(&self, id: ClientId) -> bool {
        self.state.read().await.members.contains_key(&id)
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.members.is_empty()
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn member_modes(&self, id: ClientId) -> Option<ModeSet<ChannelMode>> {
        self.state.read().await.members.get(&id).map(|member| member.modes.clone())
    }

    pub async fn members_snapshot(&self) -> Vec<(ClientRef, ModeSet<ChannelMode>)> {
        self.state
            .read()
            .await
            .members
            .values()
            .map(|member| (member.client.clone(), member.modes.clone()))
            .collect()
    }

    /// Hidden (`+s`/`+p`) channels exist only for their members.
    pub async fn visible_to(&self, id: ClientId) -> bool {
        let state = self.state.read().await;
        let hidden =
            state.modes.has(ChannelMode::Secret) || state.modes.has(ChannelMode::Private);
        !hidden || state.members.contains_key(&id)
    }

    pub async fn list_entry(&self) -> (usize, String) {
        let state = self.state.read().await;
        let topic = state.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default();
        (state.members.len(), topic)
    }

    /// Join, gated in order: invite-only, key, user limit, bans.
    pub async fn join(&self, sname: &str, client: &ClientRef, key: Option<&str>) {
        let mut state = self.state.write().await;
        if state.members.contains_key(&client.id) {
            return;
        }

        let (nick, userhost, multi_prefix) = {
            let cs = client.state.read().await;
            let nick = cs.nick.as_ref().map(|n| n.display().to_owned()).unwrap_or_default();
            let userhost = format!("{}!{}@{}", nick, cs.username, cs.shown_host());
            (nick, userhost, cs.caps.contains(&Capability::MultiPrefix))
        };
        let channel = self.name.display();

        if state.modes.has(ChannelMode::InviteOnly)
            && !state.pending_invites.contains(&client.id)
            && !mask_list_matches(&state.invite_masks, &userhost)
        {
            client.send(numeric(sname, &nick, &Numeric::InviteOnlyChan { channel }));
            return;
        }
        if state.modes.has(ChannelMode::Key)
            && state.key.as_deref() != key
        {
            client.send(numeric(sname, &nick, &Numeric::BadChannelKey { channel }));
            return;
        }
        if state.modes.has(ChannelMode::UserLimit)
            && state.user_limit.is_some_and(|limit| state.members.len() >= limit)
        {
            client.send(numeric(sname, &nick, &Numeric::ChannelIsFull { channel }));
            return;
        }
        if mask_list_matches(&state.bans, &userhost)
            && !mask_list_matches(&state.excepts, &userhost)
        {
            client.send(numeric(sname, &nick, &Numeric::BannedFromChan { channel }));
            return;
        }

        state.pending_invites.remove(&client.id);
        let mut member_modes = ModeSet::new();
        if state.members.is_empty() {
            // channel creation: the first joiner operates it
            member_modes.set(ChannelMode::ChannelOperator);
        }
        state.members.insert(client.id, Member { client: client.clone(), modes: member_modes });
        client.state.write().await.channels.insert(self.name.clone());

        let join_line = replies::join(&userhost, channel);
        for member in state.members.values() {
            member.client.send(join_line.clone());
        }

        if let Some(topic) = &state.topic {
            client.send(numeric(
                sname,
                &nick,
                &Numeric::Topic { channel, topic: &topic.text },
            ));
        }
        self.send_names(&state, sname, client, &nick, multi_prefix).await;
    }

    /// PART; returns true when the channel emptied and must be destroyed.
    pub async fn part(&self, sname: &str, client: &ClientRef, message: &Text) -> bool {
        let mut state = self.state.write().await;
        let profile = client.profile().await;
        if !state.members.contains_key(&client.id) {
            client.send(numeric(
                sname,
                &profile.nick,
                &Numeric::NotOnChannel { channel: self.name.display() },
            ));
            return false;
        }

        let line = replies::part(&profile.prefix, self.name.display(), message);
        for member in state.members.values() {
            member.client.send(line.clone());
        }
        state.members.remove(&client.id);
        client.state.write().await.channels.remove(&self.name);
        state.members.is_empty()
    }

    /// KICK; returns true when the channel emptied.
    pub async fn kick(
        &self,
        sname: &str,
        kicker: &ClientRef,
        target: &ClientRef,
        comment: &Text,
    ) -> bool {
        let mut state = self.state.write().await;
        let kicker_profile = kicker.profile().await;
        let channel = self.name.display();

        let Some(kicker_member) = state.members.get(&kicker.id) else {
            kicker.send(numeric(sname, &kicker_profile.nick, &Numeric::NotOnChannel { channel }));
            return false;
        };
        if !kicker_member.modes.has(ChannelMode::ChannelOperator) {
            kicker
                .send(numeric(sname, &kicker_profile.nick, &Numeric::ChanOPrivsNeeded { channel }));
            return false;
        }
        let target_nick = target.nick_or_star().await;
        if !state.members.contains_key(&target.id) {
            kicker.send(numeric(
                sname,
                &kicker_profile.nick,
                &Numeric::UserNotInChannel { nick: &target_nick, channel },
            ));
            return false;
        }

        let line = replies::kick(&kicker_profile.prefix, channel, &target_nick, comment);
        for member in state.members.values() {
            member.client.send(line.clone());
        }
        state.members.remove(&target.id);
        target.state.write().await.channels.remove(&self.name);
        state.members.is_empty()
    }

    /// INVITE target into the channel; the pending invite overrides `+i`
    /// on the next join.
    pub async fn invite(&self, sname: &str, inviter: &ClientRef, target: &ClientRef) {
        let mut state = self.state.write().await;
        let inviter_profile = inviter.profile().await;
        let channel = self.name.display();

        let Some(inviter_member) = state.members.get(&inviter.id) else {
            inviter
                .send(numeric(sname, &inviter_profile.nick, &Numeric::NotOnChannel { channel }));
            return;
        };
        if state.modes.has(ChannelMode::InviteOnly)
            && !inviter_member.modes.has(ChannelMode::ChannelOperator)
        {
            inviter.send(numeric(
                sname,
                &inviter_profile.nick,
                &Numeric::ChanOPrivsNeeded { channel },
            ));
            return;
        }
        let target_nick = target.nick_or_star().await;
        if state.members.contains_key(&target.id) {
            inviter.send(numeric(
                sname,
                &inviter_profile.nick,
                &Numeric::UserOnChannel { nick: &target_nick, channel },
            ));
            return;
        }

        state.pending_invites.insert(target.id);
        inviter.send(numeric(
            sname,
            &inviter_profile.nick,
            &Numeric::Inviting { nick: &target_nick, channel },
        ));
        target.send(replies::invite(&inviter_profile.prefix, &target_nick, channel));
    }

    pub async fn get_topic(&self, sname: &str, client: &ClientRef) {
        let state = self.state.read().await;
        let nick = client.nick_or_star().await;
        let channel = self.name.display();
        let hidden =
            state.modes.has(ChannelMode::Secret) || state.modes.has(ChannelMode::Private);
        if hidden && !state.members.contains_key(&client.id) {
            client.send(numeric(sname, &nick, &Numeric::NotOnChannel { channel }));
            return;
        }
        match &state.topic {
            Some(topic) => {
                client.send(numeric(sname, &nick, &Numeric::Topic { channel, topic: &topic.text }))
            }
            None => client.send(numeric(sname, &nick, &Numeric::NoTopic { channel })),
        }
    }

    pub async fn set_topic(&self, sname: &str, client: &ClientRef, topic: &Text) {
        let mut state = self.state.write().await;
        let profile = client.profile().await;
        let channel = self.name.display();

        let Some(member) = state.members.get(&client.id) else {
            client.send(numeric(sname, &profile.nick, &Numeric::NotOnChannel { channel }));
            return;
        };
        if state.modes.has(ChannelMode::OpTopic)
            && !member.modes.has(ChannelMode::ChannelOperator)
        {
            client.send(numeric(sname, &profile.nick, &Numeric::ChanOPrivsNeeded { channel }));
            return;
        }

        let text = topic.to_string();
        state.topic = if text.is_empty() {
            None
        } else {
            Some(Topic {
                text: text.clone(),
                set_by: profile.nick.clone(),
                set_at: chrono::Utc::now().timestamp(),
            })
        };
        let line = replies::topic_change(&profile.prefix, channel, &text);
        for member in state.members.values() {
            member.client.send(line.clone());
        }
    }

    /// PRIVMSG/NOTICE fan-out to every member except the sender.
    pub async fn message(&self, sname: &str, sender: &ClientRef, notice: bool, text: &Text) {
        let state = self.state.read().await;
        let profile = sender.profile().await;
        let channel = self.name.display();
        let sender_member = state.members.get(&sender.id);

        let userhost = &profile.prefix;
        let rejected = (sender_member.is_none() && state.modes.has(ChannelMode::NoOutside))
            || (state.modes.has(ChannelMode::Moderated)
                && !sender_member.is_some_and(|m| {
                    m.modes.has(ChannelMode::ChannelOperator) || m.modes.has(ChannelMode::Voice)
                }))
            || (sender_member.is_none()
                && mask_list_matches(&state.bans, userhost)
                && !mask_list_matches(&state.excepts, userhost));
        if rejected {
            sender.send(numeric(sname, &profile.nick, &Numeric::CannotSendToChan { channel }));
            return;
        }

        let line = if notice {
            replies::notice(&profile.prefix, channel, text)
        } else {
            replies::privmsg(&profile.prefix, channel, text)
        };
        for (id, member) in &state.members {
            if *id != sender.id {
                crate::metrics::MESSAGES.inc();
                member.client.send(line.clone());
            }
        }
    }

    /// NAMES burst to one client; hidden channels only answer members.
    pub async fn names_to(&self, sname: &str, client: &ClientRef) {
        let state = self.state.read().await;
        let nick = client.nick_or_star().await;
        let hidden =
            state.modes.has(ChannelMode::Secret) || state.modes.has(ChannelMode::Private);
        if hidden && !state.members.contains_key(&client.id) {
            client.send(numeric(
                sname,
                &nick,
                &Numeric::EndOfNames { channel: self.name.display() },
            ));
            return;
        }
        let multi_prefix = client.has_cap(Capability::MultiPrefix).await;
        self.send_names(&state, sname, client, &nick, multi_prefix).await;
    }

    async fn send_names(
        &self,
        state: &ChannelState,
        sname: &str,
        client: &ClientRef,
        nick: &str,
        multi_prefix: bool,
    ) {
        let mut names = Vec::with_capacity(state.members.len());
        for member in state.members.values() {
            let member_nick = member.client.nick_or_star().await;
            names.push(format!("{}{member_nick}", status_prefix(&member.modes, multi_prefix)));
        }
        names.sort_unstable();

        let head = format!("= {} :", self.name.display());
        client.send_all(replies::multiline(
            sname,
            nick,
            crate::constants::RPL_NAMREPLY,
            &head,
            &names,
        ));
        client.send(numeric(sname, nick, &Numeric::EndOfNames { channel: self.name.display() }));
    }

    /// Remove a quitting client and tell the remaining members; returns
    /// true when the channel emptied.
    pub async fn remove_on_quit(&self, client: &ClientRef, quit_line: &str) -> bool {
        let mut state = self.state.write().await;
        if state.members.remove(&client.id).is_none() {
            return state.members.is_empty();
        }
        state.pending_invites.remove(&client.id);
        for member in state.members.values() {
            member.client.send(quit_line.to_owned());
        }
        state.members.is_empty()
    }

    /// Current mode string for RPL_CHANNELMODEIS; key and limit arguments
    /// are revealed to members only.
    pub async fn mode_string(&self, viewer: ClientId) -> String {
        let state = self.state.read().await;
        let mut letters: Vec<char> = state
            .modes
            .iter()
            .filter(|m| !matches!(m, ChannelMode::ChannelOperator | ChannelMode::Voice))
            .map(|m| m.to_char())
            .collect();
        letters.sort_unstable();
        let mut out = format!("+{}", letters.into_iter().collect::<String>());
        if state.members.contains_key(&viewer) {
            if let Some(key) = &state.key {
                out.push(' ');
                out.push_str(key);
            }
            if let Some(limit) = state.user_limit {
                out.push_str(&format!(" {limit}"));
            }
        }
        out
    }

    /// Apply a MODE command: per-change privilege checks, silent drops for
    /// malformed arguments, one coalesced MODE broadcast for everything
    /// that stuck.
    pub async fn apply_modes(
        &self,
        server: &Server,
        sname: &str,
        client: &ClientRef,
        changes: &[ChannelModeArg],
    ) {
        if changes.is_empty() {
            let nick = client.nick_or_star().await;
            let modes = self.mode_string(client.id).await;
            client.send(numeric(
                sname,
                &nick,
                &Numeric::ChannelModeIs { channel: self.name.display(), modes: &modes },
            ));
            return;
        }

        let mut state = self.state.write().await;
        let profile = client.profile().await;
        let channel = self.name.display();
        let is_op = state
            .members
            .get(&client.id)
            .is_some_and(|m| m.modes.has(ChannelMode::ChannelOperator));

        let mut accepted: Vec<ChannelModeChange> = Vec::new();
        let mut denied = false;

        for change in changes {
            let Some(mode) = ChannelMode::from_char(change.mode) else {
                client.send(numeric(
                    sname,
                    &profile.nick,
                    &Numeric::UnknownMode { mode: change.mode, channel },
                ));
                continue;
            };

            // a mask-list letter without an argument queries the list
            let is_mask_list = matches!(
                mode,
                ChannelMode::BanMask | ChannelMode::ExceptMask | ChannelMode::InviteMask
            );
            if is_mask_list && change.arg.is_none() {
                self.send_mask_list(&state, sname, client, &profile.nick, mode);
                continue;
            }
            if change.op == ModeOp::List {
                // any other letter without +/- is silently dropped
                continue;
            }

            if !is_op {
                if !denied {
                    client.send(numeric(
                        sname,
                        &profile.nick,
                        &Numeric::ChanOPrivsNeeded { channel },
                    ));
                    denied = true;
                }
                continue;
            }

            let add = change.op == ModeOp::Add;
            match mode {
                ChannelMode::Anonymous
                | ChannelMode::InviteOnly
                | ChannelMode::Moderated
                | ChannelMode::NoOutside
                | ChannelMode::Quiet
                | ChannelMode::Private
                | ChannelMode::Secret
                | ChannelMode::ReOp
                | ChannelMode::OpTopic => {
                    let changed =
                        if add { state.modes.set(mode) } else { state.modes.unset(mode) };
                    if changed {
                        accepted.push(ChannelModeChange { mode, op: change.op, arg: None });
                    }
                }
                ChannelMode::Key => {
                    if add {
                        match change.arg.as_deref().filter(|key| !key.is_empty()) {
                            Some(key) => {
                                state.key = Some(key.to_owned());
                                state.modes.set(mode);
                                accepted.push(ChannelModeChange {
                                    mode,
                                    op: change.op,
                                    arg: Some(key.to_owned()),
                                });
                            }
                            None => {} // +k without a key is dropped
                        }
                    } else if state.modes.unset(mode) {
                        state.key = None;
                        accepted.push(ChannelModeChange { mode, op: change.op, arg: None });
                    }
                }
                ChannelMode::UserLimit => {
                    if add {
                        match change.arg.as_deref().and_then(|v| v.parse::<usize>().ok()) {
                            Some(limit) if limit >= 1 => {
                                state.user_limit = Some(limit);
                                state.modes.set(mode);
                                accepted.push(ChannelModeChange {
                                    mode,
                                    op: change.op,
                                    arg: Some(limit.to_string()),
                                });
                            }
                            _ => {} // unparseable limits are dropped
                        }
                    } else if state.modes.unset(mode) {
                        state.user_limit = None;
                        accepted.push(ChannelModeChange { mode, op: change.op, arg: None });
                    }
                }
                ChannelMode::BanMask | ChannelMode::ExceptMask | ChannelMode::InviteMask => {
                    let Some(mask_arg) = change.arg.as_deref() else { continue };
                    let mask = Name::new(mask_arg);
                    let list = match mode {
                        ChannelMode::BanMask => &mut state.bans,
                        ChannelMode::ExceptMask => &mut state.excepts,
                        _ => &mut state.invite_masks,
                    };
                    if add {
                        // overflow and duplicates are silently ignored
                        if list.len() >= MAX_MASK_LIST_LEN
                            || list.iter().any(|entry| entry.mask == mask)
                        {
                            continue;
                        }
                        list.push(ListEntry {
                            mask: mask.clone(),
                            set_by: profile.nick.clone(),
                            set_at: chrono::Utc::now().timestamp(),
                        });
                        accepted.push(ChannelModeChange {
                            mode,
                            op: change.op,
                            arg: Some(mask.display().to_owned()),
                        });
                    } else {
                        let before = list.len();
                        list.retain(|entry| entry.mask != mask);
                        if list.len() != before {
                            accepted.push(ChannelModeChange {
                                mode,
                                op: change.op,
                                arg: Some(mask.display().to_owned()),
                            });
                        }
                    }
                }
                ChannelMode::ChannelOperator | ChannelMode::Voice => {
                    let Some(target_arg) = change.arg.as_deref() else { continue };
                    let target_member = server
                        .clients
                        .get(target_arg)
                        .and_then(|target| state.members.contains_key(&target.id).then_some(target));
                    let Some(target) = target_member else {
                        client.send(numeric(
                            sname,
                            &profile.nick,
                            &Numeric::UserNotInChannel { nick: target_arg, channel },
                        ));
                        continue;
                    };
                    let changed = match state.members.get_mut(&target.id) {
                        Some(member) => {
                            if add { member.modes.set(mode) } else { member.modes.unset(mode) }
                        }
                        None => false,
                    };
                    if changed {
                        let target_nick = target.nick_or_star().await;
                        accepted.push(ChannelModeChange {
                            mode,
                            op: change.op,
                            arg: Some(target_nick),
                        });
                    }
                }
            }
        }

        if !accepted.is_empty() {
            let rendered = render_channel_mode_changes(&accepted);
            let line = replies::channel_mode_change(&profile.prefix, channel, &rendered);
            for member in state.members.values() {
                member.client.send(line.clone());
            }
        }
    }

    fn send_mask_list(
        &self,
        state: &ChannelState,
        sname: &str,
        client: &ClientRef,
        nick: &str,
        mode: ChannelMode,
    ) {
        let channel = self.name.display();
        let list = match mode {
            ChannelMode::BanMask => &state.bans,
            ChannelMode::ExceptMask => &state.excepts,
            _ => &state.invite_masks,
        };
        for entry in list {
            let mask = entry.mask.display();
            let reply = match mode {
                ChannelMode::BanMask => Numeric::BanList { channel, mask },
                ChannelMode::ExceptMask => Numeric::ExceptList { channel, mask },
                _ => Numeric::InviteList { channel, mask },
            };
            client.send(numeric(sname, nick, &reply));
        }
        let end = match mode {
            ChannelMode::BanMask => Numeric::EndOfBanList { channel },
            ChannelMode::ExceptMask => Numeric::EndOfExceptList { channel },
            _ => Numeric::EndOfInviteList { channel },
        };
        client.send(numeric(sname, nick, &end));
    }
}
