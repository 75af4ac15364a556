//! Operator key input.

use std::io::Read;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Exit,
    ToggleMode,
}

/// Non-blocking source of operator keys, polled once per frame.
pub trait KeySource {
    fn poll_key(&mut self) -> Option<Key>;
}

/// `q` exits, `g` toggles between attendance and gesture mode.
pub fn key_for(c: char) -> Option<Key> {
    match c {
        'q' | 'Q' => Some(Key::Exit),
        'g' | 'G' => Some(Key::ToggleMode),
        _ => None,
    }
}

/// Keys typed on stdin, read by a background thread.
pub struct StdinKeys {
    rx: mpsc::UnboundedReceiver<Key>,
}

impl StdinKeys {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("rollcall-keys".into())
            .spawn(move || {
                let mut stdin = std::io::stdin().lock();
                let mut buf = [0u8; 64];
                loop {
                    let n = match stdin.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "stdin read failed; key input disabled");
                            break;
                        }
                    };
                    for key in buf[..n].iter().filter_map(|&b| key_for(b as char)) {
                        if tx.send(key).is_err() {
                            return;
                        }
                    }
                }
                tracing::debug!("stdin closed");
            })?;
        Ok(Self { rx })
    }
}

impl KeySource for StdinKeys {
    fn poll_key(&mut self) -> Option<Key> {
        match self.rx.try_recv() {
            Ok(key) => Some(key),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// No operator input; the loop ends on cancellation or camera end.
pub struct NoKeys;

impl KeySource for NoKeys {
    fn poll_key(&mut self) -> Option<Key> {
        None
    }
}
