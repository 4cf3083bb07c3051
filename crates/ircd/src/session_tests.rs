//! Session-level scenarios: real `Server`, real client actors, in-memory
//! duplex byte streams instead of sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;

use crate::config::{Config, LimitsConfig, NetworkConfig, ServerConfig};
use crate::server::Server;

// generous so that virtual-time tests auto-advance through the idle
// timers before the read gives up
const READ_TIMEOUT: Duration = Duration::from_secs(300);

fn test_config(accounts: HashMap<String, String>, operators: HashMap<String, String>) -> Config {
    Config {
        server: ServerConfig {
            name: "irc.test".to_owned(),
            description: "test server".to_owned(),
            password: None,
            motd: None,
            listen: vec![],
            tls_listen: vec![],
        },
        network: NetworkConfig { name: "TestNet".to_owned() },
        limits: LimitsConfig { whowas_size: 16 },
        operators,
        accounts,
    }
}

async fn test_server() -> Arc<Server> {
    let server = Server::new(test_config(HashMap::new(), HashMap::new()), "ircd.toml".into());
    server.start();
    server
}

struct Session {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

async fn connect(server: &Arc<Server>) -> Session {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    server.attach(Box::new(remote), "client.test".to_owned(), false).await;
    let (reader, writer) = tokio::io::split(local);
    Session { reader: BufReader::new(reader), writer }
}

impl Session {
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("session write");
    }

    async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(READ_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => None,
            Ok(Ok(_)) => {
                assert!(line.ends_with("\r\n"), "line not CRLF-terminated: {line:?}");
                assert!(line.len() <= 512, "line exceeds 512 bytes: {line:?}");
                Some(line.trim_end().to_owned())
            }
            _ => None,
        }
    }

    /// Read lines until one contains `needle`; skipped lines are returned
    /// alongside the match.
    async fn expect(&mut self, needle: &str) -> (String, Vec<String>) {
        let mut skipped = Vec::new();
        for _ in 0..256 {
            match self.next_line().await {
                Some(line) if line.contains(needle) => return (line, skipped),
                Some(line) => skipped.push(line),
                None => break,
            }
        }
        panic!("never received a line containing {needle:?}; saw {skipped:#?}");
    }

    async fn handshake(&mut self, nick: &str) {
        self.send(&format!("NICK {nick}")).await;
        self.send(&format!("USER {nick} 0 * :{nick}")).await;
        self.expect(" 001 ").await;
        // drain the rest of the burst up to the MOTD-less marker
        self.expect(" 422 ").await;
    }

    /// PING round-trip: everything sent before it has been dispatched.
    async fn barrier(&mut self) -> Vec<String> {
        self.send("PING sync.token").await;
        let (_, skipped) = self.expect("PONG").await;
        skipped
    }
}

#[tokio::test]
async fn handshake_sends_the_welcome_burst_in_order() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    alice.send("NICK alice").await;
    alice.send("USER alice 0 * :Alice").await;

    let (welcome, skipped) = alice.expect(" 001 ").await;
    assert!(skipped.is_empty(), "001 must come first, got {skipped:?}");
    assert!(welcome.starts_with(":irc.test 001 alice :Welcome to the TestNet"));
    assert!(welcome.contains("alice!alice@"));

    let (yourhost, skipped) = alice.expect(" 002 ").await;
    assert!(skipped.is_empty());
    assert!(yourhost.contains("Your host is irc.test"));
    let (_, skipped) = alice.expect(" 003 ").await;
    assert!(skipped.is_empty());
    let (myinfo, skipped) = alice.expect(" 004 ").await;
    assert!(skipped.is_empty());
    assert!(myinfo.contains("irc.test"));

    // LUSERS numerics then the MOTD-less marker
    alice.expect(" 251 ").await;
    alice.expect(" 255 ").await;
    alice.expect(" 422 ").await;
}

#[tokio::test]
async fn join_broadcast_reaches_existing_members_once() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    alice.send("JOIN #x").await;
    alice.expect("JOIN #x").await;
    alice.expect(" 366 ").await;

    bob.send("JOIN #x").await;
    let (bob_join, _) = bob.expect("JOIN #x").await;
    assert!(bob_join.starts_with(":bob!bob@"));
    let (names, _) = bob.expect(" 353 ").await;
    assert!(names.contains("@alice"), "creator keeps op in {names}");
    assert!(names.contains("bob"));

    // alice sees bob's join exactly once
    let (join_seen, _) = alice.expect("JOIN #x").await;
    assert!(join_seen.starts_with(":bob!bob@"));
    let skipped = alice.barrier().await;
    assert!(
        !skipped.iter().any(|line| line.contains("JOIN")),
        "duplicate JOIN broadcast: {skipped:?}"
    );

    alice.send("NAMES #x").await;
    let (names, _) = alice.expect(" 353 ").await;
    assert!(names.contains("bob") && names.contains("@alice"));
}

#[tokio::test]
async fn private_messages_deliver_exactly_once_without_echo() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    alice.send("PRIVMSG bob :hi").await;
    let (delivery, _) = bob.expect("PRIVMSG bob :hi").await;
    assert!(delivery.starts_with(":alice!alice@"));

    // the sender gets no echo
    let skipped = alice.barrier().await;
    assert!(
        !skipped.iter().any(|line| line.contains("PRIVMSG")),
        "sender saw an echo: {skipped:?}"
    );
}

#[tokio::test]
async fn nick_collision_yields_433() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    alice.handshake("alice").await;

    let mut intruder = connect(&server).await;
    intruder.send("NICK alice").await;
    let (err, _) = intruder.expect(" 433 ").await;
    assert_eq!(err, ":irc.test 433 * alice :Nickname is already in use");
}

#[tokio::test]
async fn channel_keys_gate_joins() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    alice.send("MODE #x +k secret").await;
    let (mode, _) = alice.expect("MODE #x").await;
    assert!(mode.contains("+k secret"));

    bob.send("JOIN #x").await;
    let (err, _) = bob.expect(" 475 ").await;
    assert!(err.contains("#x :Cannot join channel (+k)"));

    bob.send("JOIN #x secret").await;
    let (joined, _) = bob.expect("JOIN #x").await;
    assert!(joined.starts_with(":bob!"));
}

#[tokio::test(start_paused = true)]
async fn silent_clients_are_pinged_then_killed() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;
    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    bob.send("JOIN #x").await;
    bob.expect(" 366 ").await;

    // after 180 virtual seconds of silence the server pings
    let (ping, _) = alice.expect("PING").await;
    assert_eq!(ping, "PING :irc.test");

    // no PONG for 90 more seconds: channel-mates observe the quit
    let (quit, _) = bob.expect("QUIT").await;
    assert!(quit.starts_with(":alice!alice@"));
    assert!(quit.ends_with("QUIT :ping timeout"));
}

#[tokio::test]
async fn empty_channels_are_destroyed() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    alice.handshake("alice").await;

    alice.send("JOIN #short-lived").await;
    alice.expect(" 366 ").await;
    assert!(server.channels.get("#short-lived").is_some());

    alice.send("PART #short-lived").await;
    alice.expect("PART #short-lived").await;
    alice.barrier().await;
    assert!(server.channels.get("#short-lived").is_none(), "empty channel survived");
}

#[tokio::test]
async fn channel_mode_changes_coalesce_and_are_idempotent() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;
    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    bob.send("JOIN #x").await;
    bob.expect(" 366 ").await;

    alice.send("MODE #x +mv bob").await;
    let (mode, _) = bob.expect("MODE #x").await;
    assert!(mode.contains("+mv bob"), "coalesced change, got {mode}");
    alice.expect("MODE #x").await;

    // applying the same change again is a no-op with no broadcast
    alice.send("MODE #x +m").await;
    let skipped = alice.barrier().await;
    assert!(
        !skipped.iter().any(|line| line.contains("MODE #x")),
        "idempotent change broadcast again: {skipped:?}"
    );

    alice.send("MODE #x").await;
    let (current, _) = alice.expect(" 324 ").await;
    assert!(current.contains("#x +m"));

    // non-operators cannot change state
    bob.send("MODE #x -m").await;
    let (err, _) = bob.expect(" 482 ").await;
    assert!(err.contains("#x :You're not channel operator"));
}

#[tokio::test]
async fn kick_requires_op_and_removes_the_member() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;
    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    bob.send("JOIN #x").await;
    bob.expect(" 366 ").await;

    bob.send("KICK #x alice :revolt").await;
    bob.expect(" 482 ").await;

    alice.send("KICK #x bob :settle down").await;
    let (kick, _) = bob.expect("KICK #x bob").await;
    assert!(kick.ends_with(":settle down"));

    // bob is out: speaking in the +n-less channel still works, but
    // membership is gone from the server's point of view
    let channel = server.channels.get("#x").expect("channel");
    bob.barrier().await;
    assert_eq!(channel.member_count().await, 1);
}

#[tokio::test]
async fn topic_is_gated_and_broadcast() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;
    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    bob.send("JOIN #x").await;
    bob.expect(" 366 ").await;

    alice.send("TOPIC #x").await;
    alice.expect(" 331 ").await;

    alice.send("MODE #x +t").await;
    bob.expect("MODE #x +t").await;
    bob.send("TOPIC #x :bob's topic").await;
    bob.expect(" 482 ").await;

    alice.send("TOPIC #x :all things irc").await;
    let (topic, _) = bob.expect("TOPIC #x").await;
    assert!(topic.ends_with(":all things irc"));

    bob.send("TOPIC #x").await;
    let (reply, _) = bob.expect(" 332 ").await;
    assert!(reply.ends_with("#x :all things irc"));
}

#[tokio::test]
async fn away_marks_and_answers_for_the_user() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    bob.send("AWAY :gone fishing").await;
    bob.expect(" 306 ").await;

    alice.send("PRIVMSG bob :you there?").await;
    let (away, _) = alice.expect(" 301 ").await;
    assert!(away.ends_with("bob :gone fishing"));

    bob.send("AWAY").await;
    bob.expect(" 305 ").await;
}

#[tokio::test]
async fn nick_change_is_broadcast_to_channel_mates() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;
    alice.send("JOIN #x").await;
    alice.expect(" 366 ").await;
    bob.send("JOIN #x").await;
    bob.expect(" 366 ").await;

    bob.send("NICK robert").await;
    let (change, _) = alice.expect("NICK robert").await;
    assert!(change.starts_with(":bob!bob@"));
    let (own, _) = bob.expect("NICK robert").await;
    assert!(own.starts_with(":bob!bob@"));

    bob.barrier().await;
    assert!(server.clients.get("robert").is_some());
    assert!(server.clients.get("bob").is_none());

    // the old nick is history
    alice.send("WHOWAS bob").await;
    alice.expect(" 314 ").await;
    alice.expect(" 369 ").await;
}

#[tokio::test]
async fn whowas_records_quitters() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    bob.send("QUIT :done").await;
    bob.expect("ERROR").await; // teardown finished

    alice.send("WHOWAS bob").await;
    let (entry, _) = alice.expect(" 314 ").await;
    assert!(entry.contains("bob"));
    alice.expect(" 369 ").await;

    alice.send("WHOWAS ghost").await;
    alice.expect(" 406 ").await;
}

#[tokio::test]
async fn cap_negotiation_suspends_the_welcome() {
    let server = test_server().await;
    let mut alice = connect(&server).await;

    alice.send("CAP LS 302").await;
    let (ls, _) = alice.expect("CAP * LS").await;
    assert!(ls.contains("multi-prefix") && ls.contains("sasl"));

    alice.send("NICK alice").await;
    alice.send("USER alice 0 * :Alice").await;
    alice.send("CAP REQ :multi-prefix").await;
    let (ack, skipped) = alice.expect("CAP alice ACK").await;
    assert!(ack.contains("multi-prefix"));
    assert!(
        !skipped.iter().any(|line| line.contains(" 001 ")),
        "registration completed during CAP negotiation: {skipped:?}"
    );

    alice.send("CAP END").await;
    let (welcome, _) = alice.expect(" 001 ").await;
    assert!(welcome.contains("alice"));
}

#[tokio::test]
async fn sasl_plain_login_before_registration() {
    use base64::Engine;

    let mut accounts = HashMap::new();
    accounts.insert("alice".to_owned(), bcrypt::hash("hunter2", 4).unwrap());
    let server = Server::new(test_config(accounts, HashMap::new()), "ircd.toml".into());
    server.start();

    let mut alice = connect(&server).await;
    alice.send("CAP REQ :sasl").await;
    alice.expect("ACK").await;

    alice.send("AUTHENTICATE PLAIN").await;
    let (cont, _) = alice.expect("AUTHENTICATE").await;
    assert!(cont.ends_with("AUTHENTICATE +"));

    let blob = base64::engine::general_purpose::STANDARD.encode("alice\0alice\0hunter2");
    alice.send(&format!("AUTHENTICATE {blob}")).await;
    alice.expect(" 900 ").await;
    alice.expect(" 903 ").await;

    alice.send("CAP END").await;
    alice.send("NICK alice").await;
    alice.send("USER alice 0 * :Alice").await;
    alice.expect(" 001 ").await;

    // wrong password reads as a generic failure
    let mut mallory = connect(&server).await;
    mallory.send("AUTHENTICATE PLAIN").await;
    mallory.expect("AUTHENTICATE +").await;
    let blob = base64::engine::general_purpose::STANDARD.encode("alice\0alice\0wrong");
    mallory.send(&format!("AUTHENTICATE {blob}")).await;
    let (fail, _) = mallory.expect(" 904 ").await;
    assert!(fail.contains("SASL authentication failed"));
}

#[tokio::test]
async fn oper_login_and_kill() {
    let mut operators = HashMap::new();
    operators.insert("root".to_owned(), bcrypt::hash("toor", 4).unwrap());
    let server = Server::new(test_config(HashMap::new(), operators), "ircd.toml".into());
    server.start();

    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    bob.send("KILL alice :no reason").await;
    bob.expect(" 481 ").await;

    alice.send("OPER root wrong").await;
    alice.expect(" 464 ").await;
    alice.send("OPER root toor").await;
    alice.expect(" 381 ").await;

    alice.send("KILL bob :spamming").await;
    let (error, _) = bob.expect("ERROR").await;
    assert!(error.contains("KILLed by alice: spamming"));

    alice.barrier().await;
    assert!(server.clients.get("bob").is_none());
}

#[tokio::test]
async fn unknown_commands_get_421() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    alice.handshake("alice").await;

    alice.send("FROBNICATE now").await;
    let (err, _) = alice.expect(" 421 ").await;
    assert!(err.contains("FROBNICATE :Unknown command"));
}

#[tokio::test]
async fn pre_registration_commands_are_dropped() {
    let server = test_server().await;
    let mut alice = connect(&server).await;

    // not registered yet: LIST is dropped without a reply
    alice.send("LIST").await;
    alice.send("NICK alice").await;
    alice.send("USER alice 0 * :Alice").await;
    let (_, skipped) = alice.expect(" 001 ").await;
    assert!(skipped.is_empty(), "pre-registration command produced output: {skipped:?}");
}

#[tokio::test]
async fn invite_only_channels_honor_invitations() {
    let server = test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    alice.handshake("alice").await;
    bob.handshake("bob").await;

    alice.send("JOIN #inner").await;
    alice.expect(" 366 ").await;
    alice.send("MODE #inner +i").await;
    alice.expect("MODE #inner +i").await;

    bob.send("JOIN #inner").await;
    let (err, _) = bob.expect(" 473 ").await;
    assert!(err.contains("Cannot join channel (+i)"));

    alice.send("INVITE bob #inner").await;
    alice.expect(" 341 ").await;
    let (invite, _) = bob.expect("INVITE").await;
    assert!(invite.starts_with(":alice!"));

    bob.send("JOIN #inner").await;
    bob.expect("JOIN #inner").await;
}
