//! `shellmux connect --project <name> --path <dir>` — attach the local
//! terminal to a project shell.
//!
//! Mounts a session controller on the terminal window, connects, and enters
//! raw mode to pipe keystrokes to the session and its output to stdout.
//! Window resizes are forwarded. Ctrl+] leaves; so does the session ending.

use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shellmux_client::{
    Renderer, SessionController, SessionRegistry, SessionState, StaticToken, TerminalBinder, Timing,
    UrlOpener,
};
use shellmux_core::{MountTarget, Project};

use crate::config::Settings;
use crate::terminal::{self as term, StdoutRenderer, TerminalWindow};

/// Prints URLs the remote process asks to open.
struct PrintOpener;

impl UrlOpener for PrintOpener {
    fn open_url(&self, url: &str) {
        let mut err = std::io::stderr();
        let _ = write!(err, "\r\nshellmux: open {url}\r\n");
    }
}

const INPUT_POLL: Duration = Duration::from_millis(100);

enum LocalEvent {
    Input(String),
    Resize,
    Quit,
}

pub async fn run(settings: &Settings, project: Project, session: Option<String>, token: Option<String>) -> Result<()> {
    let target = MountTarget::new(project, session);
    info!(key = %target.key(), dir = target.project.working_dir(), "attaching");

    let binder = TerminalBinder::new(settings.surface.clone(), |_| {
        Box::new(StdoutRenderer) as Box<dyn Renderer>
    });
    let mut ctl = SessionController::new(
        SessionRegistry::new(),
        binder,
        super::resolver(settings)?,
        Box::new(StaticToken(token)),
        Box::new(PrintOpener),
        Timing::default(),
    );

    let guard = term::RawModeGuard::enter()?;

    ctl.mount(target, Rc::new(TerminalWindow)).await?;
    ctl.connect().await.context("connect failed")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<LocalEvent>();

    // crossterm's event reader blocks; keep it off the async loop. Polling
    // lets the thread notice the loop below has gone away.
    let input_handle = tokio::task::spawn_blocking(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(INPUT_POLL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("crossterm poll error: {e}");
                break;
            }
        }
        let local = match event::read() {
            Ok(Event::Key(key)) if term::is_escape(&key) => LocalEvent::Quit,
            Ok(Event::Key(key)) => match term::key_event_to_input(&key) {
                Some(text) => LocalEvent::Input(text),
                None => continue,
            },
            Ok(Event::Paste(text)) => LocalEvent::Input(text),
            Ok(Event::Resize(..)) => LocalEvent::Resize,
            Ok(_) => continue,
            Err(e) => {
                warn!("crossterm event error: {e}");
                LocalEvent::Quit
            }
        };
        let quit = matches!(local, LocalEvent::Quit);
        if tx.send(local).is_err() || quit {
            break;
        }
    });

    loop {
        tokio::select! {
            event = ctl.next_event() => match event {
                Some(event) => {
                    ctl.handle_event(event).await;
                    if ctl.state() == SessionState::Disconnected {
                        break;
                    }
                }
                None => break,
            },
            Some(local) = rx.recv() => match local {
                LocalEvent::Input(text) => ctl.input(&text),
                LocalEvent::Resize => {
                    let dims = ctl.host_resized()?;
                    debug!(cols = dims.cols, rows = dims.rows, "window resized");
                }
                LocalEvent::Quit => {
                    info!("disconnect requested");
                    if ctl.state() != SessionState::Disconnected {
                        ctl.disconnect()?;
                    }
                    break;
                }
            },
        }
    }

    drop(rx);
    let _ = input_handle.await;
    ctl.unmount();
    drop(guard);
    eprintln!("\r\nshellmux: session closed");
    Ok(())
}
