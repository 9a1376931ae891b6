//! The per-conversation handshake state machine.
//!
//! States: `Idle -> Initiated -> Established`, or `Idle -> Restored` when a
//! persisted session re-derives its key without a network round trip.
//!
//! The simultaneous-initiate race is safe by construction: each side combines
//! its own secret key with whatever public key arrives, and X25519 agreement
//! is symmetric per key pair. The one correctness-critical rule is that a
//! keypair generated for an `initiate` must not be regenerated before the
//! matching `accept`/`initiate` is processed, or the two sides derive
//! different keys. [`Conversation::initiate`] therefore reuses the pending
//! keypair instead of generating a new one.

use crate::crypto::{self, derive_session_key, KeyPair, Nonce, PublicKey, SessionKey};
use crate::error::{Error, Result};
use crate::identity::{Identity, PairKey};
use crate::session::store::{SessionRecord, SessionStore};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use zeroize::Zeroizing;

/// Where a conversation currently stands. Reported by [`Conversation::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key material yet.
    Idle,
    /// We sent an `initiate` and are waiting for the peer.
    Initiated,
    /// Key re-derived from persisted material; no handshake ran this process.
    Restored,
    /// Key derived from a live handshake.
    Established,
}

/// A conversation with a derived session key.
///
/// Encryption requires this handle, which only exists once the state machine
/// has a key — sending before a session is established is unrepresentable.
pub struct EstablishedSession {
    key_pair: KeyPair,
    peer_public: PublicKey,
    key: SessionKey,
}

impl EstablishedSession {
    fn derive(key_pair: KeyPair, peer_public: PublicKey) -> Result<Self> {
        let key = derive_session_key(&key_pair, &peer_public)?;
        Ok(Self { key_pair, peer_public, key })
    }

    /// Our public key for this session.
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    /// The peer's public key this session was derived against.
    pub fn peer_public(&self) -> &PublicKey {
        &self.peer_public
    }

    /// The derived symmetric key.
    pub fn session_key(&self) -> &SessionKey {
        &self.key
    }

    /// Encrypt a payload for this conversation (embedded tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Nonce)> {
        crypto::encrypt(&self.key, plaintext)
    }

    /// Decrypt a payload from this conversation.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &Nonce,
        tag: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        crypto::decrypt(&self.key, ciphertext, nonce, tag)
    }

    /// The record to persist so this session can be restored later.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord::new(*self.key_pair.secret_bytes(), *self.peer_public.as_bytes())
    }

    fn into_key_pair(self) -> KeyPair {
        self.key_pair
    }
}

enum State {
    Idle,
    Initiated { key_pair: KeyPair },
    Restored { session: EstablishedSession },
    Established { session: EstablishedSession },
}

/// Handshake state for one ordered pair of identities.
pub struct Conversation {
    local: Identity,
    peer: Identity,
    state: State,
}

impl Conversation {
    /// Start a conversation in `Idle`. Self-conversations are rejected.
    pub fn new(local: Identity, peer: Identity) -> Result<Self> {
        if local == peer {
            return Err(Error::Protocol("conversation with self".into()));
        }
        Ok(Self { local, peer, state: State::Idle })
    }

    /// Our identity.
    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// The peer's identity.
    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    /// The unordered pair key for this conversation.
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.local, &self.peer)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        match self.state {
            State::Idle => SessionState::Idle,
            State::Initiated { .. } => SessionState::Initiated,
            State::Restored { .. } => SessionState::Restored,
            State::Established { .. } => SessionState::Established,
        }
    }

    /// The established session, if any. Restored sessions are usable.
    pub fn session(&self) -> Option<&EstablishedSession> {
        match &self.state {
            State::Restored { session } | State::Established { session } => Some(session),
            _ => None,
        }
    }

    /// Begin (or re-advertise) a handshake; returns the public key to send in
    /// an `initiate` message.
    ///
    /// While `Initiated` the pending keypair is reused, never regenerated.
    /// With a live session the current session keypair is re-advertised; the
    /// peer's `accept` then supersedes the key for the pair.
    pub fn initiate(&mut self) -> PublicKey {
        match &self.state {
            State::Idle => {
                let key_pair = KeyPair::generate();
                let public = *key_pair.public_key();
                self.state = State::Initiated { key_pair };
                public
            }
            State::Initiated { key_pair } => *key_pair.public_key(),
            State::Restored { session } | State::Established { session } => *session.public_key(),
        }
    }

    /// Handle an `initiate` from the peer (responder role). Derives the key,
    /// moves to `Established`, and returns our public key for the `accept`
    /// reply.
    ///
    /// If we had initiated simultaneously, the pending keypair is used, so
    /// both sides converge on the same key. With a live session the peer has
    /// evidently lost its key material and a fresh handshake supersedes it.
    pub fn on_initiate(&mut self, peer_public: PublicKey) -> Result<PublicKey> {
        check_peer_key(&peer_public)?;

        let key_pair = match mem::replace(&mut self.state, State::Idle) {
            State::Idle => KeyPair::generate(),
            State::Initiated { key_pair } => key_pair,
            State::Restored { .. } | State::Established { .. } => KeyPair::generate(),
        };

        let session = EstablishedSession::derive(key_pair, peer_public)?;
        let public = *session.public_key();
        self.state = State::Established { session };
        Ok(public)
    }

    /// Handle an `accept` from the peer (initiator role). Derives the key and
    /// moves to `Established`.
    ///
    /// An `accept` while already established is a superseding re-key from the
    /// current keypair; an `accept` in `Idle` is an out-of-state transition
    /// and is rejected.
    pub fn on_accept(&mut self, peer_public: PublicKey) -> Result<()> {
        check_peer_key(&peer_public)?;

        let key_pair = match mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                return Err(Error::Protocol("accept without a pending handshake".into()));
            }
            State::Initiated { key_pair } => key_pair,
            State::Restored { session } | State::Established { session } => {
                session.into_key_pair()
            }
        };

        let session = EstablishedSession::derive(key_pair, peer_public)?;
        self.state = State::Established { session };
        Ok(())
    }

    /// Restore from persisted key material: `Idle -> Restored`, purely local.
    pub fn restore(&mut self, record: &SessionRecord) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(Error::Protocol("restore over an active session".into()));
        }
        let key_pair = KeyPair::from_secret_bytes(record.secret_key);
        let peer_public = PublicKey::from_bytes(record.peer_public);
        let session = EstablishedSession::derive(key_pair, peer_public)?;
        self.state = State::Restored { session };
        Ok(())
    }
}

/// Reject unusable peer keys before touching conversation state, so a bad
/// handshake message abandons only itself and never tears down a session.
/// Low-order points fail agreement for every secret, so a throwaway pair is a
/// valid probe.
fn check_peer_key(peer_public: &PublicKey) -> Result<()> {
    KeyPair::generate().diffie_hellman(peer_public).map(|_| ())
}

/// Client-side session manager: one [`Conversation`] per peer, persisted
/// through a pluggable [`SessionStore`].
pub struct SessionManager<S: SessionStore> {
    local: Identity,
    store: S,
    conversations: HashMap<Identity, Conversation>,
}

impl<S: SessionStore> SessionManager<S> {
    /// Create a manager for the given local identity.
    pub fn new(local: Identity, store: S) -> Self {
        Self {
            local,
            store,
            conversations: HashMap::new(),
        }
    }

    /// Our identity.
    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// Open a conversation, restoring a persisted session when one exists.
    /// Returns the resulting state.
    pub fn open(&mut self, peer: &Identity) -> Result<SessionState> {
        self.ensure(peer)?;
        Ok(self.state(peer))
    }

    /// Current state for a peer (`Idle` when the conversation is unknown).
    pub fn state(&self, peer: &Identity) -> SessionState {
        self.conversations
            .get(peer)
            .map(Conversation::state)
            .unwrap_or(SessionState::Idle)
    }

    /// The established session for a peer, if any.
    pub fn session(&self, peer: &Identity) -> Option<&EstablishedSession> {
        self.conversations.get(peer).and_then(Conversation::session)
    }

    /// Begin a handshake with a peer; returns the public key to send.
    pub fn initiate(&mut self, peer: &Identity) -> Result<PublicKey> {
        self.ensure(peer)?;
        let conv = self
            .conversations
            .get_mut(peer)
            .ok_or(Error::NoSession)?;
        Ok(conv.initiate())
    }

    /// Handle an `initiate` from a peer; persists the derived session and
    /// returns our public key for the `accept` reply.
    pub fn on_initiate(&mut self, peer: &Identity, peer_public: PublicKey) -> Result<PublicKey> {
        self.ensure(peer)?;
        let pair = PairKey::new(&self.local, peer);
        let conv = self
            .conversations
            .get_mut(peer)
            .ok_or(Error::NoSession)?;
        let own_public = conv.on_initiate(peer_public)?;
        let record = conv
            .session()
            .map(EstablishedSession::to_record)
            .ok_or(Error::NoSession)?;
        self.store.save(&pair, &record)?;
        Ok(own_public)
    }

    /// Handle an `accept` from a peer; persists the derived session.
    pub fn on_accept(&mut self, peer: &Identity, peer_public: PublicKey) -> Result<()> {
        self.ensure(peer)?;
        let pair = PairKey::new(&self.local, peer);
        let conv = self
            .conversations
            .get_mut(peer)
            .ok_or(Error::NoSession)?;
        conv.on_accept(peer_public)?;
        let record = conv
            .session()
            .map(EstablishedSession::to_record)
            .ok_or(Error::NoSession)?;
        self.store.save(&pair, &record)?;
        Ok(())
    }

    /// Drop the conversation and its persisted record.
    pub fn forget(&mut self, peer: &Identity) -> Result<bool> {
        self.conversations.remove(peer);
        self.store.delete(&PairKey::new(&self.local, peer))
    }

    fn ensure(&mut self, peer: &Identity) -> Result<()> {
        if let Entry::Vacant(entry) = self.conversations.entry(peer.clone()) {
            let mut conv = Conversation::new(self.local.clone(), peer.clone())?;
            if let Some(record) = self.store.load(&PairKey::new(&self.local, peer))? {
                conv.restore(&record)?;
            }
            entry.insert(conv);
        }
        Ok(())
    }
}
