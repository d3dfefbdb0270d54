//! End-to-end session tests against a scripted steamcmd over a real PTY.

use std::time::Duration;
use steamshell::{
    AbortReason, FakeSteamCmd, LineKind, Session, SessionConfig, SessionError, SessionEvent, State,
};
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_wait_for_returns_output_until_prompt() {
    let fake = FakeSteamCmd::new()
        .respond("cmd", &["foo", "bar"])
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();

    let result = session.wait_for("cmd").await.unwrap();
    assert_eq!(result.lines, vec!["foo", "bar"]);
    assert_eq!(result.command, "cmd");
    assert_eq!(session.state(), State::PromptReady);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_commands_run_in_submission_order() {
    let fake = FakeSteamCmd::new()
        .respond("A", &["from A"])
        .respond("B", &["from B"])
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();

    let (a, b) = futures::join!(session.wait_for("A"), session.wait_for("B"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.lines, vec!["from A"]);
    assert_eq!(b.lines, vec!["from B"]);
    assert!(a.id < b.id);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identical_commands_each_get_their_own_output() {
    let fake = FakeSteamCmd::new()
        .script("tick", "n=$((${n:-0} + 1)); printf 'tick %s\\n' \"$n\"")
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();

    let (first, second) = futures::join!(session.wait_for("tick"), session.wait_for("tick"));
    assert_eq!(first.unwrap().lines, vec!["tick 1"]);
    assert_eq!(second.unwrap().lines, vec!["tick 2"]);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_follow_streams_every_line_once() {
    let fake = FakeSteamCmd::new()
        .script("slow", "echo one; sleep 0.1; echo two; sleep 0.1; echo three")
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();

    let mut seen = Vec::new();
    let mut calls = 0;
    let result = session
        .follow("slow", |lines, _| {
            calls += 1;
            seen.extend(lines.iter().map(|l| l.text.clone()));
        })
        .await
        .unwrap();

    assert_eq!(seen, vec!["one", "two", "three"]);
    assert_eq!(result.lines, seen);
    assert!(calls >= 2, "expected incremental batches, got {calls} call(s)");

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_follow_answers_password_prompt() {
    let fake = FakeSteamCmd::new()
        .script("ask", "printf 'password: '; read -r pw; printf 'got %s\\n' \"$pw\"")
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();

    let result = session
        .follow("ask", |lines, stdin| {
            if lines.iter().any(|l| l.kind == LineKind::Password) {
                stdin.send_line("hunter2");
            }
        })
        .await
        .unwrap();

    assert_eq!(result.lines, vec!["password:", "got hunter2"]);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_events() {
    let fake = FakeSteamCmd::new().respond("cmd", &["foo"]).install().unwrap();
    let session = fake.spawn().unwrap();
    let mut events = session.subscribe();

    let result = session.wait_for("cmd").await.unwrap();
    let events = drain(&mut events);

    assert!(matches!(events[0], SessionEvent::BootstrapFinished { pid } if pid > 0));
    assert_eq!(events[1], SessionEvent::ClientReady);
    assert_eq!(
        events[2..],
        [
            SessionEvent::CommandOutput {
                id: result.id,
                command: "cmd".into(),
                line: Some("foo".into()),
                finished: false,
            },
            SessionEvent::CommandOutput {
                id: result.id,
                command: "cmd".into(),
                line: None,
                finished: true,
            },
        ]
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_secret_command_text_stays_out_of_events() {
    let fake = FakeSteamCmd::new().respond("login *", &["Logged in OK"]).install().unwrap();
    let session = fake.spawn().unwrap();
    let mut events = session.subscribe();

    let result = session
        .wait_for(steamshell::Command::secret("login gaben hunter2", "login gaben"))
        .await
        .unwrap();
    assert_eq!(result.command, "login gaben");

    let json: Vec<String> = drain(&mut events)
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect();
    assert!(json.iter().all(|e| !e.contains("hunter2")));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_timeout() {
    let fake = FakeSteamCmd::new().script("hang", "sleep 2").install().unwrap();
    let config = SessionConfig {
        command_timeout: Some(Duration::from_millis(300)),
        ..fake.config()
    };
    let session = Session::spawn(config).unwrap();
    session.ready().await.unwrap();

    let err = session.wait_for("hang").await.unwrap_err();
    assert!(matches!(err, SessionError::CommandTimeout { ref command, .. } if command == "hang"));
    assert_eq!(session.state(), State::Executing);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_timeout_starts_when_command_is_sent() {
    let fake = FakeSteamCmd::new()
        .script(
            "busy",
            "i=1; while [ $i -le 6 ]; do echo \"progress ($i / 6)\"; sleep 0.15; i=$((i + 1)); done",
        )
        .respond("fast", &["done"])
        .install()
        .unwrap();
    let config = SessionConfig {
        command_timeout: Some(Duration::from_millis(400)),
        ..fake.config()
    };
    let session = Session::spawn(config).unwrap();

    // `fast` sits in the queue far longer than the idle limit.
    let (busy, fast) = futures::join!(session.wait_for("busy"), session.wait_for("fast"));
    assert_eq!(busy.unwrap().lines.len(), 6);
    assert_eq!(fast.unwrap().lines, vec!["done"]);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_clear_queue_drops_unsent_commands() {
    let fake = FakeSteamCmd::new()
        .script("hang", "sleep 1; echo done")
        .respond("B", &["b"])
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();
    session.ready().await.unwrap();

    let s = session.clone();
    let hang = tokio::spawn(async move { s.wait_for("hang").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let s = session.clone();
    let b = tokio::spawn(async move { s.wait_for("B").await });
    let s = session.clone();
    let c = tokio::spawn(async move { s.wait_for("B").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.clear_queue().await.unwrap(), 2);
    for queued in [b, c] {
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Aborted {
                reason: AbortReason::Cleared,
                ..
            }
        ));
    }
    assert_eq!(hang.await.unwrap().unwrap().lines, vec!["done"]);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_process_exit_aborts_waiters() {
    let fake = FakeSteamCmd::new().script("crash", "exit 3").install().unwrap();
    let session = fake.spawn().unwrap();
    let mut events = session.subscribe();

    let (crashed, queued) = futures::join!(session.wait_for("crash"), session.wait_for("never"));
    for err in [crashed.unwrap_err(), queued.unwrap_err()] {
        assert!(matches!(
            err,
            SessionError::Aborted {
                reason: AbortReason::ProcessExited { code: Some(3) },
                ..
            }
        ));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut events).contains(&SessionEvent::ProcessExited { exit_code: Some(3) }));
    assert!(matches!(session.wait_for("cmd").await, Err(SessionError::Closed)));
}

#[tokio::test]
async fn test_output_written_just_before_exit_is_kept() {
    let fake = FakeSteamCmd::new()
        .script("crash", "echo 'last words'; exit 3")
        .install()
        .unwrap();
    let session = fake.spawn().unwrap();
    let mut events = session.subscribe();

    assert!(session.wait_for("crash").await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::CommandOutput { line: Some(line), .. } if line == "last words"
    )));
    assert!(events.contains(&SessionEvent::ProcessExited { exit_code: Some(3) }));
}

#[tokio::test]
async fn test_shutdown_sends_quit() {
    let fake = FakeSteamCmd::new().install().unwrap();
    let session = fake.spawn().unwrap();
    session.ready().await.unwrap();
    assert_eq!(session.shutdown().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_shutdown_kills_a_tool_that_ignores_quit() {
    let fake = FakeSteamCmd::new().ignore_quit().install().unwrap();
    let config = SessionConfig {
        quit_grace: Duration::from_millis(200),
        ..fake.config()
    };
    let session = Session::spawn(config).unwrap();
    session.ready().await.unwrap();
    // 128 + SIGKILL
    assert_eq!(session.shutdown().await.unwrap(), Some(137));
}

#[tokio::test]
async fn test_missing_tool_is_a_spawn_error() {
    let config = SessionConfig {
        program: "/nonexistent/steamcmd.sh".into(),
        ..SessionConfig::default()
    };
    assert!(matches!(Session::spawn(config), Err(SessionError::Spawn { .. })));
}
