//! Broker server
//!
//! Listens on a local stream socket, keeps one non-blocking connection
//! per client and applies their region registrations. Touches routed to
//! a region are written to the owner without blocking; a client that
//! cannot keep up is dropped along with its regions.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use super::protocol::{ClientMessage, RejectReason, ServerMessage, TouchMessage};
use super::regions::{ClientId, RegionError, RegionTable};
use crate::config::BrokerConfig;
use crate::constants::CLIENT_BUFFER_LIMIT;
use crate::utils::Arena;

const READ_CHUNK: usize = 512;

struct Client {
    stream: UnixStream,
    /// Bytes of a message not yet complete
    pending: Vec<u8>,
}

/// Region broker
pub struct Broker {
    listener: UnixListener,
    socket_path: PathBuf,
    clients: Arena<Client>,
    regions: RegionTable,
    max_clients: usize,
    send_nack: bool,
}

impl Broker {
    /// Bind the broker socket, replacing a stale one
    pub fn bind(cfg: &BrokerConfig) -> Result<Self> {
        let path = PathBuf::from(&cfg.socket_path);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Cannot remove stale socket {:?}", path))?;
            debug!("Removed stale socket {:?}", path);
        }

        let listener =
            UnixListener::bind(&path).with_context(|| format!("Cannot bind {:?}", path))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make broker socket non-blocking")?;
        if let Err(e) =
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(cfg.socket_mode))
        {
            warn!("Cannot set mode {:o} on {:?}: {}", cfg.socket_mode, path, e);
        }

        info!("Region broker listening on {:?}", path);
        Ok(Self {
            listener,
            socket_path: path,
            clients: Arena::new(),
            regions: RegionTable::new(),
            max_clients: cfg.max_clients,
            send_nack: cfg.send_nack,
        })
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn listener_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }

    /// Descriptors of connected clients
    pub fn poll_sources(&self) -> Vec<(ClientId, BorrowedFd<'_>)> {
        self.clients
            .iter()
            .map(|(id, c)| (id, c.stream.as_fd()))
            .collect()
    }

    /// Accept every pending connection
    pub fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    self.add_client(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Broker accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Adopt a connected stream. Over the client limit the stream is
    /// closed immediately.
    pub fn add_client(&mut self, stream: UnixStream) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            debug!("Client limit ({}) reached, closing connection", self.max_clients);
            return None;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Cannot make client socket non-blocking: {}", e);
            return None;
        }
        let id = self.clients.insert(Client {
            stream,
            pending: Vec::new(),
        });
        debug!("Client {} connected", id);
        Some(id)
    }

    /// Drain a readable client and apply its messages
    pub fn read_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut closed = false;
        loop {
            match client.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => client.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Client {} read error: {}", id, e);
                    closed = true;
                    break;
                }
            }
        }

        let messages = take_messages(id, &mut client.pending);
        for msg in messages {
            self.handle_message(id, msg);
        }

        if closed {
            self.disconnect(id);
        }
    }

    fn handle_message(&mut self, id: ClientId, msg: ClientMessage) {
        match msg {
            ClientMessage::Register {
                region_id,
                screen_index,
                rect,
            } => {
                if let Err(e) = self.regions.register(region_id, screen_index, rect, id) {
                    warn!("Client {}: region registration rejected: {}", id, e);
                    if self.send_nack {
                        let reason = match e {
                            RegionError::Conflict { .. } => RejectReason::Conflict,
                            _ => RejectReason::Invalid,
                        };
                        self.send(id, &ServerMessage::Rejected { region_id, reason });
                    }
                }
            }
            ClientMessage::Unregister { region_id } => {
                if let Err(e) = self.regions.unregister(region_id, id) {
                    debug!("Client {}: unregister ignored: {}", id, e);
                }
            }
        }
    }

    /// Drop a client and every region it owns
    pub fn disconnect(&mut self, id: ClientId) {
        if self.clients.remove(id).is_some() {
            let removed = self.regions.remove_client(id);
            debug!("Client {} disconnected ({} regions released)", id, removed);
        }
    }

    /// Send a touch to a region owner. Returns false if the owner is gone
    /// or was dropped because the write would block or failed.
    pub fn forward(&mut self, owner: ClientId, touch: TouchMessage) -> bool {
        self.send(owner, &ServerMessage::Touch(touch))
    }

    fn send(&mut self, id: ClientId, msg: &ServerMessage) -> bool {
        let Some(client) = self.clients.get_mut(id) else {
            return false;
        };
        let bytes = msg.encode();
        match client.stream.write(&bytes) {
            Ok(n) if n == bytes.len() => true,
            Ok(n) => {
                debug!("Client {}: short write ({} of {})", id, n, bytes.len());
                self.disconnect(id);
                false
            }
            Err(e) => {
                debug!("Client {}: write failed: {}", id, e);
                self.disconnect(id);
                false
            }
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Split complete messages off the front of a client buffer
fn take_messages(id: ClientId, pending: &mut Vec<u8>) -> Vec<ClientMessage> {
    let mut messages = Vec::new();
    let mut consumed = 0;
    loop {
        match ClientMessage::decode(&pending[consumed..]) {
            Ok(Some((msg, used))) => {
                messages.push(msg);
                consumed += used;
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Client {}: {}, discarding {} bytes", id, e, pending.len() - consumed);
                consumed = pending.len();
                break;
            }
        }
    }
    pending.drain(..consumed);

    if pending.len() > CLIENT_BUFFER_LIMIT {
        warn!("Client {}: buffer overflow, discarding", id);
        pending.clear();
    }
    messages
}
