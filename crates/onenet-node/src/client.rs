//! The CLIENT role.
//!
//! A client starts life outside any network. Given an invite code it
//! scans channels for an invite broadcast, adopts the address and key
//! inside, and announces itself to the master. From then on it answers
//! the master's admin traffic, keeps its peer table, and checks in
//! before its keep-alive interval lapses. Like the master it is
//! sans-I/O; channel changes surface as outputs for the radio driver.

use tracing::{debug, info, warn};

use onenet_core::ack_nack::NackReason;
use onenet_core::admin::AdminMessage;
use onenet_core::features::Features;
use onenet_core::packet::EncodedPacket;
use onenet_core::payload::{InvitePayload, MessageType, INVITE_VERSION};
use onenet_core::types::{Did, NetworkId, Priority, UnitId};
use onenet_crypto::{KeyFragment, KeyStore, XteaKey};
use onenet_mac::wire;
use onenet_mac::{Action, Engine, EngineConfig, Event, OutboundSingle};

use crate::error::NodeError;
use crate::invite::InviteCode;
use crate::peer::{PeerAssignment, PeerTable};
use crate::persist::StoredNetwork;

/// How long to listen on one channel before hopping to the next.
pub const SCAN_DWELL_MS: u64 = 250;

/// Channels cycled during an invite scan.
pub const DEFAULT_CHANNEL_COUNT: u8 = 25;

const PEER_CAPACITY: usize = 8;

#[derive(Debug)]
struct Scan {
    key: XteaKey,
    channel: u8,
    channel_count: u8,
    next_hop: u64,
}

/// Something the application must do on the client's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutput {
    Transmit(Vec<u8>),
    /// Retune the radio, used while scanning for an invite.
    SetChannel(u8),
    Event(ClientEvent),
}

/// Client-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Joined {
        nid: NetworkId,
        did: Did,
        master_features: Features,
    },
    /// The master removed this device; saved state should be cleared.
    Removed,
    /// The network key rotated; saved state should be rewritten.
    KeyRotated { fragment: KeyFragment },
    AppMessage { src: Did, data: Vec<u8> },
    SendFailed { dst: Did, reason: Option<NackReason> },
    /// A decrypted block or stream frame for the application's session
    /// machinery.
    SessionFrame { packet: EncodedPacket, raw: Vec<u8> },
}

/// A client device.
pub struct Client {
    engine: Engine,
    features: Features,
    joined: bool,
    channel: u8,
    master_features: Features,
    keep_alive_ms: u32,
    next_keep_alive: u64,
    low_frag_delay_ms: u16,
    high_frag_delay_ms: u16,
    settings_flags: u8,
    peers: PeerTable,
    scan: Option<Scan>,
}

impl Client {
    /// A factory-fresh client with no network.
    pub fn new(features: Features, keep_alive_ms: u32) -> Self {
        // Placeholder identity until an invite hands out the real one.
        let config = EngineConfig::new(Did::BROADCAST, NetworkId::UNASSIGNED, features);
        Self {
            engine: Engine::new(config, KeyStore::new(XteaKey::new([0; 16]))),
            features,
            joined: false,
            channel: 0,
            master_features: Features::UNKNOWN,
            keep_alive_ms,
            next_keep_alive: 0,
            low_frag_delay_ms: 50,
            high_frag_delay_ms: 25,
            settings_flags: 0,
            peers: PeerTable::new(PEER_CAPACITY),
            scan: None,
        }
    }

    /// Resume membership from saved parameters.
    pub fn from_stored(
        stored: &StoredNetwork,
        features: Features,
        keep_alive_ms: u32,
        now_ms: u64,
    ) -> Result<Self, NodeError> {
        let nid = stored
            .nid()
            .ok_or_else(|| NodeError::Config(format!("stored nid {:x} out of range", stored.nid)))?;
        let did = stored
            .did()
            .ok_or_else(|| NodeError::Config(format!("stored did {:x} out of range", stored.did)))?;
        let mut client = Self::new(features, keep_alive_ms);
        client.engine.network_joined(nid, did, stored.keys());
        client.joined = true;
        client.channel = stored.channel;
        client.next_keep_alive = now_ms + u64::from(keep_alive_ms);
        info!(%did, %nid, "membership restored");
        Ok(client)
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    pub fn did(&self) -> Did {
        self.engine.did()
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn master_features(&self) -> &Features {
        &self.master_features
    }

    pub fn keep_alive_ms(&self) -> u32 {
        self.keep_alive_ms
    }

    /// Current (low, high) priority fragment delays in ms.
    pub fn fragment_delays(&self) -> (u16, u16) {
        (self.low_frag_delay_ms, self.high_frag_delay_ms)
    }

    pub fn settings_flags(&self) -> u8 {
        self.settings_flags
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Everything worth keeping across a restart.
    pub fn snapshot(&self) -> Result<StoredNetwork, NodeError> {
        if !self.joined {
            return Err(NodeError::NotJoined);
        }
        Ok(StoredNetwork {
            nid: self.engine.nid().raw(),
            did: self.engine.did().raw(),
            channel: self.channel,
            current_key: *self.engine.keys().current().as_bytes(),
            old_key: *self.engine.keys().old().as_bytes(),
            devices: Vec::new(),
        })
    }

    /// Start scanning for an invite enciphered under `code`. The radio
    /// is retuned to channel 0 and hops every [`SCAN_DWELL_MS`].
    pub fn look_for_invite(
        &mut self,
        code: &InviteCode,
        channel_count: u8,
        now_ms: u64,
    ) -> Result<Vec<ClientOutput>, NodeError> {
        if self.joined {
            return Err(NodeError::AlreadyJoined);
        }
        self.scan = Some(Scan {
            key: code.derive_key(),
            channel: 0,
            channel_count: channel_count.max(1),
            next_hop: now_ms + SCAN_DWELL_MS,
        });
        self.engine.begin_join();
        info!("scanning for invite");
        Ok(vec![ClientOutput::SetChannel(0)])
    }

    /// Give up on a pending invite scan.
    pub fn stop_looking(&mut self) -> Result<(), NodeError> {
        if self.scan.take().is_none() {
            return Err(NodeError::NoInviteInProgress);
        }
        Ok(())
    }

    /// Factory reset: forget the network, the master, and all peers.
    /// The caller clears saved state and may scan for a new invite.
    pub fn reset(&mut self) {
        info!("client reset");
        *self = Self::new(self.features, self.keep_alive_ms);
    }

    /// Queue an application single.
    pub fn send_app(&mut self, dst: Did, data: Vec<u8>, priority: Priority) -> Result<(), NodeError> {
        if !self.joined {
            return Err(NodeError::NotJoined);
        }
        self.engine
            .queue_single(OutboundSingle::app(dst, data).with_priority(priority))?;
        Ok(())
    }

    /// Raise an application message on one of this device's units and
    /// fan it out to every assigned peer. The first data byte carries
    /// the source and destination unit nibbles.
    pub fn send_unit_message(&mut self, src_unit: UnitId, data: &[u8]) -> Result<usize, NodeError> {
        if !self.joined {
            return Err(NodeError::NotJoined);
        }
        let targets = self.peers.targets_for(src_unit);
        for &(peer, peer_unit) in &targets {
            let mut payload = Vec::with_capacity(data.len() + 1);
            payload.push((src_unit.raw() << 4) | peer_unit.raw());
            payload.extend_from_slice(data);
            self.engine.queue_single(OutboundSingle {
                dst: peer,
                msg_type: MessageType::AppWithSrcUnit,
                data: payload,
                priority: Priority::Low,
                hops: None,
            })?;
        }
        Ok(targets.len())
    }

    /// Advance timers: the scan hop schedule, the keep-alive check-in,
    /// and the engine's own transaction timing.
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<ClientOutput>, NodeError> {
        let mut out = Vec::new();

        if let Some(scan) = &mut self.scan {
            if now_ms >= scan.next_hop {
                scan.channel = (scan.channel + 1) % scan.channel_count;
                scan.next_hop = now_ms + SCAN_DWELL_MS;
                out.push(ClientOutput::SetChannel(scan.channel));
            }
        }

        if self.joined && now_ms >= self.next_keep_alive {
            self.next_keep_alive = now_ms + u64::from(self.keep_alive_ms);
            self.engine
                .queue_single(OutboundSingle::admin(Did::MASTER, &AdminMessage::KeepAliveQuery))?;
        }

        let actions = self.engine.poll(now_ms)?;
        self.translate(actions, now_ms, &mut out)?;
        Ok(out)
    }

    /// Signal that the radio finished the engine's last data write.
    pub fn on_write_complete(&mut self, now_ms: u64) {
        self.engine.on_write_complete(now_ms);
    }

    /// Process one received frame.
    pub fn handle_frame(&mut self, bytes: &[u8], now_ms: u64) -> Result<Vec<ClientOutput>, NodeError> {
        let actions = self.engine.handle_frame(bytes, now_ms)?;
        let mut out = Vec::new();
        self.translate(actions, now_ms, &mut out)?;
        Ok(out)
    }

    fn translate(
        &mut self,
        actions: Vec<Action>,
        now_ms: u64,
        out: &mut Vec<ClientOutput>,
    ) -> Result<(), NodeError> {
        for action in actions {
            match action {
                Action::Transmit(frame) => out.push(ClientOutput::Transmit(frame)),
                Action::Event(event) => self.process_event(event, now_ms, out)?,
            }
        }
        Ok(())
    }

    fn process_event(
        &mut self,
        event: Event,
        now_ms: u64,
        out: &mut Vec<ClientOutput>,
    ) -> Result<(), NodeError> {
        match event {
            Event::InviteFrame(packet) => self.process_invite(packet, now_ms, out)?,
            Event::AppMessage { src, data } => {
                out.push(ClientOutput::Event(ClientEvent::AppMessage { src, data }));
            }
            Event::AdminMessage { src, message } => self.process_admin(src, message, out)?,
            Event::KeyRotated { fragment } => {
                out.push(ClientOutput::Event(ClientEvent::KeyRotated { fragment }));
            }
            Event::SingleFailed { dst, reason, .. } => {
                warn!(%dst, ?reason, "single failed");
                out.push(ClientOutput::Event(ClientEvent::SendFailed { dst, reason }));
            }
            Event::SingleDelivered { dst, .. } => {
                debug!(%dst, "single delivered");
            }
            Event::SessionFrame { packet, raw } => {
                out.push(ClientOutput::Event(ClientEvent::SessionFrame { packet, raw }));
            }
        }
        Ok(())
    }

    fn process_invite(
        &mut self,
        packet: EncodedPacket,
        now_ms: u64,
        out: &mut Vec<ClientOutput>,
    ) -> Result<(), NodeError> {
        let Some(scan) = &self.scan else {
            return Ok(());
        };
        // An invite for someone else's code will not decipher; keep
        // scanning.
        let Ok(raw) = wire::open_frame_with_key(&packet, &scan.key) else {
            debug!("invite frame did not open under our code");
            return Ok(());
        };
        let invite = InvitePayload::parse(&raw)?;
        if invite.version != INVITE_VERSION {
            warn!(version = invite.version, "invite version not understood");
            return Ok(());
        }

        self.channel = scan.channel;
        self.scan = None;
        self.engine.network_joined(
            packet.nid,
            invite.assigned_did,
            KeyStore::new(invite.network_key),
        );
        self.joined = true;
        self.master_features = invite.master_features;
        self.next_keep_alive = now_ms + u64::from(self.keep_alive_ms);
        info!(did = %invite.assigned_did, nid = %packet.nid, "invite accepted");

        // Announce ourselves so the master learns our features and
        // marks the join complete.
        self.engine.queue_single(OutboundSingle::admin(
            Did::MASTER,
            &AdminMessage::StatusResponse {
                features: self.features,
            },
        ))?;
        out.push(ClientOutput::Event(ClientEvent::Joined {
            nid: packet.nid,
            did: invite.assigned_did,
            master_features: invite.master_features,
        }));
        Ok(())
    }

    fn process_admin(
        &mut self,
        src: Did,
        message: AdminMessage,
        out: &mut Vec<ClientOutput>,
    ) -> Result<(), NodeError> {
        match message {
            AdminMessage::StatusQuery => {
                self.engine.queue_single(OutboundSingle::admin(
                    src,
                    &AdminMessage::StatusResponse {
                        features: self.features,
                    },
                ))?;
            }
            AdminMessage::ChangeKeepAlive { interval_ms } => {
                self.keep_alive_ms = interval_ms;
                self.engine.queue_single(OutboundSingle::admin(
                    src,
                    &AdminMessage::ChangeKeepAliveResponse { interval_ms },
                ))?;
            }
            AdminMessage::ChangeFragmentDelay { low_ms, high_ms } => {
                self.low_frag_delay_ms = low_ms;
                self.high_frag_delay_ms = high_ms;
                self.engine.queue_single(OutboundSingle::admin(
                    src,
                    &AdminMessage::ChangeFragmentDelayResponse { low_ms, high_ms },
                ))?;
            }
            AdminMessage::ChangeSettings { flags } => {
                self.settings_flags = flags;
                self.engine.queue_single(OutboundSingle::admin(
                    src,
                    &AdminMessage::ChangeSettingsResponse { flags },
                ))?;
            }
            AdminMessage::AssignPeer {
                peer,
                src_unit,
                peer_unit,
            } => {
                let added = self.peers.assign(PeerAssignment {
                    src_unit,
                    peer,
                    peer_unit,
                });
                if !added {
                    warn!(%peer, "peer table full, assignment dropped");
                }
            }
            AdminMessage::UnassignPeer {
                peer,
                src_unit,
                peer_unit,
            } => {
                self.peers.unassign(src_unit, peer, peer_unit);
            }
            AdminMessage::RemoveDevice { did } if did == self.engine.did() => {
                info!("removed from network");
                self.joined = false;
                self.peers = PeerTable::new(PEER_CAPACITY);
                out.push(ClientOutput::Event(ClientEvent::Removed));
            }
            AdminMessage::RemoveDevice { did } => {
                // A peer left the network; drop any fan-out toward it.
                self.peers.remove_peer(did);
            }
            other => {
                debug!(%src, admin = ?other.admin_type(), "unhandled admin message");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(Features::simple_client().with_peer(true), 60_000)
    }

    #[test]
    fn scan_hops_channels_on_the_dwell_interval() {
        let mut client = client();
        let code = InviteCode::new("abcd1234").unwrap();
        let out = client.look_for_invite(&code, 3, 0).unwrap();
        assert_eq!(out, vec![ClientOutput::SetChannel(0)]);

        assert!(client.poll(SCAN_DWELL_MS - 1).unwrap().is_empty());
        let out = client.poll(SCAN_DWELL_MS).unwrap();
        assert_eq!(out, vec![ClientOutput::SetChannel(1)]);
        let out = client.poll(2 * SCAN_DWELL_MS).unwrap();
        assert_eq!(out, vec![ClientOutput::SetChannel(2)]);
        // Wraps back to the first channel.
        let out = client.poll(3 * SCAN_DWELL_MS).unwrap();
        assert_eq!(out, vec![ClientOutput::SetChannel(0)]);
    }

    #[test]
    fn sending_before_joining_is_refused() {
        let mut client = client();
        assert!(matches!(
            client.send_app(Did::MASTER, vec![1], Priority::Low),
            Err(NodeError::NotJoined)
        ));
    }

    #[test]
    fn restored_client_is_joined() {
        let stored = StoredNetwork {
            nid: 0x2A13F7890,
            did: 0x002,
            channel: 3,
            current_key: [7; 16],
            old_key: [6; 16],
            devices: Vec::new(),
        };
        let client =
            Client::from_stored(&stored, Features::simple_client(), 60_000, 0).unwrap();
        assert!(client.is_joined());
        assert_eq!(client.did(), Did::FIRST_CLIENT);
        assert_eq!(client.channel(), 3);
        assert_eq!(client.snapshot().unwrap(), stored);
    }

    #[test]
    fn keep_alive_fires_on_schedule() {
        let stored = StoredNetwork {
            nid: 0x2A13F7890,
            did: 0x002,
            channel: 0,
            current_key: [7; 16],
            old_key: [7; 16],
            devices: Vec::new(),
        };
        let mut client =
            Client::from_stored(&stored, Features::simple_client(), 1000, 0).unwrap();

        assert!(client.poll(999).unwrap().is_empty());
        let out = client.poll(1000).unwrap();
        // The check-in single goes straight out.
        assert!(out
            .iter()
            .any(|o| matches!(o, ClientOutput::Transmit(_))));
    }

    #[test]
    fn unit_messages_fan_out_to_assigned_peers() {
        let stored = StoredNetwork {
            nid: 0x2A13F7890,
            did: 0x002,
            channel: 0,
            current_key: [7; 16],
            old_key: [7; 16],
            devices: Vec::new(),
        };
        let mut client =
            Client::from_stored(&stored, Features::simple_client(), 60_000, 0).unwrap();
        client.peers.assign(PeerAssignment {
            src_unit: UnitId::new(1).unwrap(),
            peer: Did::new(0x003).unwrap(),
            peer_unit: UnitId::new(2).unwrap(),
        });
        client.peers.assign(PeerAssignment {
            src_unit: UnitId::new(1).unwrap(),
            peer: Did::new(0x004).unwrap(),
            peer_unit: UnitId::new(0).unwrap(),
        });

        let sent = client
            .send_unit_message(UnitId::new(1).unwrap(), &[0xAA])
            .unwrap();
        assert_eq!(sent, 2);
        // No peer listens on unit 5.
        let sent = client
            .send_unit_message(UnitId::new(5).unwrap(), &[0xAA])
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[test]
    fn reset_returns_to_factory_state() {
        let stored = StoredNetwork {
            nid: 0x2A13F7890,
            did: 0x002,
            channel: 3,
            current_key: [7; 16],
            old_key: [7; 16],
            devices: Vec::new(),
        };
        let mut client =
            Client::from_stored(&stored, Features::simple_client(), 60_000, 0).unwrap();
        assert!(client.is_joined());

        client.reset();
        assert!(!client.is_joined());
        assert!(matches!(
            client.send_app(Did::MASTER, vec![1], Priority::Low),
            Err(NodeError::NotJoined)
        ));
    }

    #[test]
    fn stop_looking_requires_a_scan() {
        let mut client = client();
        assert!(matches!(
            client.stop_looking(),
            Err(NodeError::NoInviteInProgress)
        ));
        let code = InviteCode::new("abcd1234").unwrap();
        client.look_for_invite(&code, 3, 0).unwrap();
        assert!(client.stop_looking().is_ok());
        assert!(!client.is_scanning());
    }
}
