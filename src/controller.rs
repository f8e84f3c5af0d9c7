//! UI-facing command loop.
//!
//! One task owns the [`Negotiator`] and runs every operation to completion
//! before looking at the next command, signal or peer event.

use crate::error::{Error, Result};
use crate::logger::log;
use crate::media::TrackKind;
use crate::negotiator::Negotiator;
use crate::notify::ChatMessage;
use crate::session::{ConnectionStatus, Role};
use crate::signaling::SignalInbox;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum Command {
    Start(Role, Reply<()>),
    End(Reply<()>),
    Skip(Reply<()>),
    ToggleTrack {
        kind: TrackKind,
        enabled: bool,
        reply: Reply<usize>,
    },
    SetSpeaker {
        enabled: bool,
        reply: Reply<()>,
    },
    SendChat {
        text: String,
        reply: Reply<ChatMessage>,
    },
    Status(oneshot::Sender<ConnectionStatus>),
}

/// Handle для UI. Когда все handle отброшены, сессия завершается и цикл останавливается.
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<Command>,
}

impl CallHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    pub async fn start(&self, role: Role) -> Result<()> {
        self.request(|reply| Command::Start(role, reply)).await
    }

    pub async fn end(&self) -> Result<()> {
        self.request(Command::End).await
    }

    pub async fn skip(&self) -> Result<()> {
        self.request(Command::Skip).await
    }

    pub async fn toggle_track(&self, kind: TrackKind, enabled: bool) -> Result<usize> {
        self.request(|reply| Command::ToggleTrack {
            kind,
            enabled,
            reply,
        })
        .await
    }

    pub async fn set_speaker(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetSpeaker { enabled, reply })
            .await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let text = text.into();
        self.request(|reply| Command::SendChat { text, reply })
            .await
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .await
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)
    }
}

pub struct CallController {
    negotiator: Negotiator,
    commands: mpsc::Receiver<Command>,
    inbound: SignalInbox,
}

impl CallController {
    pub fn spawn(negotiator: Negotiator, inbound: SignalInbox) -> (CallHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(16);
        let controller = CallController {
            negotiator,
            commands,
            inbound,
        };
        let task = tokio::spawn(controller.run());
        (CallHandle { tx }, task)
    }

    async fn run(mut self) {
        let mut inbound_open = true;
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd).await,
                    None => {
                        log("All call handles dropped, ending session");
                        self.negotiator.end_session().await;
                        break;
                    }
                },
                msg = self.inbound.recv(), if inbound_open => match msg {
                    Some(msg) => {
                        if let Err(e) = self.negotiator.handle_signal(msg).await {
                            log(&format!("Signal handling failed: {}", e));
                        }
                    }
                    None => {
                        log("Signaling inbox closed");
                        inbound_open = false;
                    }
                },
                Some(event) = self.negotiator.next_event() => {
                    if let Err(e) = self.negotiator.handle_event(event).await {
                        log(&format!("Event handling failed: {}", e));
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::Start(role, reply) => {
                let _ = reply.send(self.negotiator.start_session(role).await);
            }
            Command::End(reply) => {
                self.negotiator.end_session().await;
                let _ = reply.send(Ok(()));
            }
            Command::Skip(reply) => {
                let _ = reply.send(self.negotiator.skip_session().await);
            }
            Command::ToggleTrack {
                kind,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.negotiator.toggle_track(kind, enabled));
            }
            Command::SetSpeaker { enabled, reply } => {
                let _ = reply.send(self.negotiator.set_speaker_enabled(enabled));
            }
            Command::SendChat { text, reply } => {
                let _ = reply.send(self.negotiator.send_chat(&text).await);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.negotiator.status());
            }
        }
    }
}
