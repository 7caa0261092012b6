//! The MASTER role.
//!
//! Exactly one master exists per network. It owns the network ID and
//! key, invites clients and assigns their addresses, runs key rotation
//! campaigns, and pushes settings changes. Like the MAC engine it is
//! sans-I/O: `poll` and `handle_frame` return frames to transmit and
//! events for the application.

use rand::Rng;
use tracing::{debug, info, warn};

use onenet_core::ack_nack::ResponseHandle;
use onenet_core::admin::AdminMessage;
use onenet_core::features::Features;
use onenet_core::packet::EncodedPacket;
use onenet_core::payload::{InvitePayload, INVITE_VERSION};
use onenet_core::pid::{PacketKind, Pid};
use onenet_core::types::{Did, NetworkId, Priority};
use onenet_crypto::{KeyFragment, KeyStore, XteaKey};
use onenet_mac::{Action, Engine, EngineConfig, Event, OutboundSingle};
use onenet_mac::wire;

use crate::error::NodeError;
use crate::invite::InviteCode;
use crate::persist::{StoredDevice, StoredNetwork};

/// How often a pending invite is rebroadcast.
pub const INVITE_RESEND_MS: u64 = 250;

/// Default window for a client to accept an invite.
pub const DEFAULT_INVITE_TIMEOUT_MS: u64 = 60_000;

/// One client the master knows about.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub did: Did,
    pub features: Features,
    pub keep_alive_ms: u32,
    /// Confirmed the current key fragment.
    pub key_confirmed: bool,
    /// Completed the join handshake (invited clients start false).
    pub joined: bool,
}

#[derive(Debug)]
struct PendingInvite {
    key: XteaKey,
    assigned: Did,
    deadline: u64,
    next_broadcast: u64,
}

#[derive(Debug)]
struct RotationCampaign {
    fragment: KeyFragment,
    pending: Vec<Did>,
}

/// Something the application must do on the master's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterOutput {
    Transmit(Vec<u8>),
    Event(MasterEvent),
}

/// Master-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    ClientJoined { did: Did, features: Features },
    ClientRemoved { did: Did },
    InviteExpired,
    KeyRotationComplete,
    AppMessage { src: Did, data: Vec<u8> },
    /// A decrypted block or stream frame for the application's session
    /// machinery.
    SessionFrame { packet: EncodedPacket, raw: Vec<u8> },
}

/// The network master.
pub struct Master {
    engine: Engine,
    features: Features,
    channel: u8,
    max_clients: usize,
    keep_alive_ms: u32,
    clients: Vec<ClientRecord>,
    invite: Option<PendingInvite>,
    rotation: Option<RotationCampaign>,
    pending_removals: Vec<Did>,
}

impl Master {
    /// Stand up a brand-new network with a random key.
    pub fn create_network<R: Rng>(
        nid: NetworkId,
        channel: u8,
        features: Features,
        max_clients: usize,
        keep_alive_ms: u32,
        rng: &mut R,
    ) -> Self {
        let mut key = [0u8; 16];
        rng.fill(&mut key);
        let keys = KeyStore::new(XteaKey::new(key));
        info!(%nid, channel, "network created");
        Self::with_keys(nid, channel, features, max_clients, keep_alive_ms, keys)
    }

    /// Resume a network from saved parameters.
    pub fn from_stored(
        stored: &StoredNetwork,
        features: Features,
        max_clients: usize,
        keep_alive_ms: u32,
    ) -> Result<Self, NodeError> {
        let nid = stored
            .nid()
            .ok_or_else(|| NodeError::Config(format!("stored nid {:x} out of range", stored.nid)))?;
        let mut master = Self::with_keys(
            nid,
            stored.channel,
            features,
            max_clients,
            keep_alive_ms,
            stored.keys(),
        );
        for device in &stored.devices {
            master.clients.push(ClientRecord {
                did: device.did(),
                features: device.features(),
                keep_alive_ms: device.keep_alive_ms,
                key_confirmed: device.key_confirmed,
                joined: true,
            });
        }
        info!(%nid, clients = master.clients.len(), "network restored");
        Ok(master)
    }

    fn with_keys(
        nid: NetworkId,
        channel: u8,
        features: Features,
        max_clients: usize,
        keep_alive_ms: u32,
        keys: KeyStore,
    ) -> Self {
        let config = EngineConfig::new(Did::MASTER, nid, features);
        let mut engine = Engine::new(config, keys);
        engine.start();
        Self {
            engine,
            features,
            channel,
            max_clients,
            keep_alive_ms,
            clients: Vec::new(),
            invite: None,
            rotation: None,
            pending_removals: Vec::new(),
        }
    }

    pub fn nid(&self) -> NetworkId {
        self.engine.nid()
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.iter()
    }

    pub fn client(&self, did: Did) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.did == did)
    }

    pub fn invite_in_progress(&self) -> bool {
        self.invite.is_some()
    }

    pub fn rotation_in_progress(&self) -> bool {
        self.rotation.is_some()
    }

    /// Everything worth keeping across a restart. Clients still mid-join
    /// are not saved; an interrupted invite starts over.
    pub fn snapshot(&self) -> StoredNetwork {
        StoredNetwork {
            nid: self.engine.nid().raw(),
            did: Did::MASTER.raw(),
            channel: self.channel,
            current_key: *self.engine.keys().current().as_bytes(),
            old_key: *self.engine.keys().old().as_bytes(),
            devices: self
                .clients
                .iter()
                .filter(|c| c.joined)
                .map(|c| StoredDevice {
                    did: c.did.raw(),
                    features: *c.features.as_bytes(),
                    keep_alive_ms: c.keep_alive_ms,
                    key_confirmed: c.key_confirmed,
                })
                .collect(),
        }
    }

    /// The lowest client address not yet handed out.
    fn allocate_did(&self) -> Result<Did, NodeError> {
        if self.clients.len() >= self.max_clients {
            return Err(NodeError::NetworkFull);
        }
        let mut candidate = Did::FIRST_CLIENT;
        while self.clients.iter().any(|c| c.did == candidate) {
            candidate = candidate.next_client().ok_or(NodeError::NetworkFull)?;
        }
        Ok(candidate)
    }

    /// Start inviting one client under `code`. The invite packet is
    /// rebroadcast until a client joins or the window closes.
    pub fn start_invite(
        &mut self,
        code: &InviteCode,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Result<Did, NodeError> {
        if self.invite.is_some() {
            return Err(NodeError::InviteInProgress);
        }
        let assigned = self.allocate_did()?;
        self.clients.push(ClientRecord {
            did: assigned,
            features: Features::UNKNOWN,
            keep_alive_ms: self.keep_alive_ms,
            key_confirmed: true,
            joined: false,
        });
        self.invite = Some(PendingInvite {
            key: code.derive_key(),
            assigned,
            deadline: now_ms + timeout_ms,
            next_broadcast: now_ms,
        });
        info!(%assigned, "invite started");
        Ok(assigned)
    }

    /// Abandon a pending invite and free its address.
    pub fn cancel_invite(&mut self) {
        if let Some(invite) = self.invite.take() {
            self.clients.retain(|c| c.did != invite.assigned || c.joined);
            debug!(assigned = %invite.assigned, "invite canceled");
        }
    }

    fn invite_frame(&self, invite: &PendingInvite) -> Result<Vec<u8>, NodeError> {
        let payload = InvitePayload {
            version: INVITE_VERSION,
            assigned_did: invite.assigned,
            network_key: *self.engine.keys().current(),
            master_features: self.features,
        };
        let frame = wire::seal_frame(
            Did::BROADCAST,
            self.engine.nid(),
            Did::MASTER,
            Pid::new(PacketKind::InviteNewClient),
            &payload.encode(),
            &invite.key,
            None,
        )?;
        Ok(frame)
    }

    /// Advance timers: invite rebroadcasts, the invite deadline, and
    /// the engine's own transaction timing.
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<MasterOutput>, NodeError> {
        let mut out = Vec::new();

        if let Some(mut invite) = self.invite.take() {
            if now_ms >= invite.deadline {
                warn!(assigned = %invite.assigned, "invite expired");
                self.clients.retain(|c| c.did != invite.assigned || c.joined);
                out.push(MasterOutput::Event(MasterEvent::InviteExpired));
            } else {
                if now_ms >= invite.next_broadcast {
                    invite.next_broadcast = now_ms + INVITE_RESEND_MS;
                    out.push(MasterOutput::Transmit(self.invite_frame(&invite)?));
                }
                self.invite = Some(invite);
            }
        }

        let actions = self.engine.poll(now_ms)?;
        out.extend(self.translate(actions));
        Ok(out)
    }

    /// Signal that the radio finished the engine's last data write.
    pub fn on_write_complete(&mut self, now_ms: u64) {
        self.engine.on_write_complete(now_ms);
    }

    /// Process one received frame.
    pub fn handle_frame(&mut self, bytes: &[u8], now_ms: u64) -> Result<Vec<MasterOutput>, NodeError> {
        let actions = self.engine.handle_frame(bytes, now_ms)?;
        Ok(self.translate(actions))
    }

    /// Queue an application single toward a client.
    pub fn send_app(&mut self, dst: Did, data: Vec<u8>, priority: Priority) -> Result<(), NodeError> {
        if self.client(dst).is_none() {
            return Err(NodeError::UnknownClient(dst));
        }
        self.engine
            .queue_single(OutboundSingle::app(dst, data).with_priority(priority))?;
        Ok(())
    }

    /// Start a key rotation campaign: pick a random low fragment,
    /// rotate our own store, and push the fragment to every client.
    /// Traffic to a client stays on the old key until it confirms.
    pub fn rotate_key<R: Rng>(&mut self, rng: &mut R) -> Result<KeyFragment, NodeError> {
        let mut bytes = [0u8; 4];
        rng.fill(&mut bytes);
        let fragment = KeyFragment::new(bytes);
        self.engine.rotate_keys(fragment);

        let targets: Vec<Did> = self
            .clients
            .iter()
            .filter(|c| c.joined)
            .map(|c| c.did)
            .collect();
        for client in &mut self.clients {
            client.key_confirmed = false;
        }
        for &did in &targets {
            self.engine.devices_mut().get_or_insert(did)?.use_old_key = true;
            self.engine
                .queue_single(OutboundSingle::admin(did, &AdminMessage::NewKeyFragment { fragment }))?;
        }
        info!(clients = targets.len(), "key rotation started");
        self.rotation = Some(RotationCampaign {
            fragment,
            pending: targets,
        });
        Ok(fragment)
    }

    /// Tell a client to leave and forget it once the message lands.
    pub fn remove_client(&mut self, did: Did) -> Result<(), NodeError> {
        if self.client(did).is_none() {
            return Err(NodeError::UnknownClient(did));
        }
        self.engine
            .queue_single(OutboundSingle::admin(did, &AdminMessage::RemoveDevice { did }))?;
        self.pending_removals.push(did);
        Ok(())
    }

    /// Push a new keep-alive interval to a client.
    pub fn set_keep_alive(&mut self, did: Did, interval_ms: u32) -> Result<(), NodeError> {
        if self.client(did).is_none() {
            return Err(NodeError::UnknownClient(did));
        }
        self.engine.queue_single(OutboundSingle::admin(
            did,
            &AdminMessage::ChangeKeepAlive { interval_ms },
        ))?;
        Ok(())
    }

    /// Push new fragment delays to a client.
    pub fn set_fragment_delays(&mut self, did: Did, low_ms: u16, high_ms: u16) -> Result<(), NodeError> {
        if self.client(did).is_none() {
            return Err(NodeError::UnknownClient(did));
        }
        self.engine.queue_single(OutboundSingle::admin(
            did,
            &AdminMessage::ChangeFragmentDelay { low_ms, high_ms },
        ))?;
        Ok(())
    }

    /// Push new settings flags to a client.
    pub fn set_flags(&mut self, did: Did, flags: u8) -> Result<(), NodeError> {
        if self.client(did).is_none() {
            return Err(NodeError::UnknownClient(did));
        }
        self.engine
            .queue_single(OutboundSingle::admin(did, &AdminMessage::ChangeSettings { flags }))?;
        Ok(())
    }

    /// Assign a peer connection on a client.
    pub fn assign_peer(
        &mut self,
        on: Did,
        src_unit: onenet_core::types::UnitId,
        peer: Did,
        peer_unit: onenet_core::types::UnitId,
    ) -> Result<(), NodeError> {
        if self.client(on).is_none() {
            return Err(NodeError::UnknownClient(on));
        }
        self.engine.queue_single(OutboundSingle::admin(
            on,
            &AdminMessage::AssignPeer {
                peer,
                src_unit,
                peer_unit,
            },
        ))?;
        Ok(())
    }

    fn translate(&mut self, actions: Vec<Action>) -> Vec<MasterOutput> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                Action::Transmit(frame) => out.push(MasterOutput::Transmit(frame)),
                Action::Event(event) => self.process_event(event, &mut out),
            }
        }
        out
    }

    fn process_event(&mut self, event: Event, out: &mut Vec<MasterOutput>) {
        match event {
            Event::AppMessage { src, data } => {
                out.push(MasterOutput::Event(MasterEvent::AppMessage { src, data }));
            }
            Event::AdminMessage { src, message } => self.process_admin(src, message, out),
            Event::SingleDelivered { dst, response, .. } => {
                if response.handle == ResponseHandle::KeyFragment {
                    self.confirm_rotation(dst, out);
                }
                if self.pending_removals.contains(&dst) {
                    self.finish_removal(dst, out);
                }
            }
            Event::SingleFailed { dst, reason, .. } => {
                warn!(%dst, ?reason, "single to client failed");
                // A client we are removing may already be gone; forget
                // it either way.
                if self.pending_removals.contains(&dst) {
                    self.finish_removal(dst, out);
                }
            }
            Event::SessionFrame { packet, raw } => {
                out.push(MasterOutput::Event(MasterEvent::SessionFrame { packet, raw }));
            }
            // Masters neither scan for invites nor receive fragments.
            Event::InviteFrame(_) | Event::KeyRotated { .. } => {}
        }
    }

    fn process_admin(&mut self, src: Did, message: AdminMessage, out: &mut Vec<MasterOutput>) {
        match message {
            AdminMessage::StatusResponse { features } => {
                let joined_now = self
                    .invite
                    .as_ref()
                    .is_some_and(|invite| invite.assigned == src);
                if let Some(client) = self.clients.iter_mut().find(|c| c.did == src) {
                    client.features = features;
                    if joined_now && !client.joined {
                        client.joined = true;
                        self.invite = None;
                        info!(did = %src, "client joined");
                        out.push(MasterOutput::Event(MasterEvent::ClientJoined {
                            did: src,
                            features,
                        }));
                    }
                }
            }
            AdminMessage::KeyFragmentConfirm { fragment } => {
                if self
                    .rotation
                    .as_ref()
                    .is_some_and(|r| r.fragment == fragment)
                {
                    self.confirm_rotation(src, out);
                }
            }
            AdminMessage::ChangeKeepAliveResponse { interval_ms } => {
                if let Some(client) = self.clients.iter_mut().find(|c| c.did == src) {
                    client.keep_alive_ms = interval_ms;
                }
            }
            AdminMessage::KeepAliveQuery => {
                debug!(did = %src, "keep-alive");
            }
            other => {
                debug!(did = %src, admin = ?other.admin_type(), "unhandled admin message");
            }
        }
    }

    fn confirm_rotation(&mut self, did: Did, out: &mut Vec<MasterOutput>) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.did == did) {
            client.key_confirmed = true;
        }
        if let Some(device) = self.engine.devices_mut().get_mut(did) {
            device.use_old_key = false;
        }
        let Some(rotation) = &mut self.rotation else {
            return;
        };
        rotation.pending.retain(|&d| d != did);
        if rotation.pending.is_empty() {
            info!("key rotation complete");
            self.rotation = None;
            out.push(MasterOutput::Event(MasterEvent::KeyRotationComplete));
        }
    }

    fn finish_removal(&mut self, did: Did, out: &mut Vec<MasterOutput>) {
        self.pending_removals.retain(|&d| d != did);
        self.clients.retain(|c| c.did != did);
        self.engine.devices_mut().remove(did);
        info!(%did, "client removed");
        out.push(MasterOutput::Event(MasterEvent::ClientRemoved { did }));
    }
}
