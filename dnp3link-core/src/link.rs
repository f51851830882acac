//! Link-layer state machine
//!
//! Owns the secondary (receive) and primary (send) sub-machines, the
//! frame-count bits for both directions, the retry counters and the single
//! response timer. Inbound operations run to completion on the runtime's
//! thread; upstream send results are posted to the runtime rather than
//! synthesized inside the call that produced them, so no callback ever
//! re-enters the component that issued it.
//!
//! Protocol anomalies on receive never surface as errors to the caller: the
//! offending frame is dropped, a structured code is logged, and a counter in
//! [`LinkStatistics`] is bumped.

use crate::constants::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
use crate::encoder;
use crate::error::LinkError;
use crate::runtime::{Runtime, Timer};
use crate::types::{LinkConfig, LinkFunction};
use bytes::Bytes;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{error, warn};

/// Upward interface: callbacks into the layer above the link
pub trait LinkListener {
    /// A user payload arrived in a (confirmed or unconfirmed) data frame
    fn on_receive(&mut self, payload: &[u8]);

    /// Terminal result of the most recent [`LinkLayer::send`]
    fn on_send_result(&mut self, success: bool);

    /// The link went online or offline
    fn on_state_change(&mut self, online: bool);
}

/// Downward interface: the transport that carries encoded frames
///
/// Every `transmit` must later be answered by exactly one
/// [`LinkLayer::on_transmit_result`] call.
pub trait LinkTransmitter {
    /// Hand one encoded frame to the transport
    fn transmit(&mut self, frame: &[u8]);
}

/// Structured codes logged when a received frame is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Direction bit disagrees with the configured role
    WrongMasterBit,
    /// Source address is not the configured remote
    UnknownSource,
    /// Destination address is not the configured local address
    UnknownDestination,
    /// Valid frame that would violate the protocol in the current state
    UnexpectedLpdu,
    /// Frame-count bit mismatch on a confirmed frame or link test
    WrongFcb,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            DiscardReason::WrongMasterBit => "WRONG_MASTER_BIT",
            DiscardReason::UnknownSource => "UNKNOWN_SOURCE",
            DiscardReason::UnknownDestination => "UNKNOWN_DESTINATION",
            DiscardReason::UnexpectedLpdu => "UNEXPECTED_LPDU",
            DiscardReason::WrongFcb => "WRONG_FCB",
        };
        f.write_str(code)
    }
}

/// Counters kept by the link layer, queryable at any time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatistics {
    /// Frames handed to the transport
    pub frames_transmitted: u64,
    /// Frames presented by the transport, valid or not
    pub frames_received: u64,
    /// Frames dropped for a direction-bit mismatch
    pub wrong_master_bit: u64,
    /// Frames dropped for an unknown source address
    pub unknown_source: u64,
    /// Frames dropped for an unknown destination address
    pub unknown_destination: u64,
    /// Valid frames dropped as protocol violations in the current state
    pub unexpected_lpdu: u64,
    /// Confirmed frames or link tests dropped for a frame-count-bit mismatch
    pub wrong_fcb: u64,
}

impl LinkStatistics {
    fn record(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::WrongMasterBit => self.wrong_master_bit += 1,
            DiscardReason::UnknownSource => self.unknown_source += 1,
            DiscardReason::UnknownDestination => self.unknown_destination += 1,
            DiscardReason::UnexpectedLpdu => self.unexpected_lpdu += 1,
            DiscardReason::WrongFcb => self.wrong_fcb += 1,
        }
    }
}

/// Primary (transmit-path) states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrimaryState {
    /// No transaction in progress
    Idle,
    /// UNCONFIRMED_USER_DATA emitted, awaiting the transmit callback
    SendingUnconfirmed,
    /// CONFIRMED_USER_DATA emitted, awaiting the transmit callback
    SendingConfirmed,
    /// RESET_LINK_STATES emitted, awaiting its ACK
    ResettingLink,
    /// Confirmed data transmitted, awaiting its ACK
    WaitForConfirm,
}

/// Secondary (receive-path) states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecondaryState {
    Unreset,
    Reset,
}

/// Which sub-machine owns the frame currently handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxOwner {
    Primary,
    Secondary,
}

/// Deferred side effects of a state transition, executed after the session
/// borrow is released so callbacks can never observe the machine mid-step
enum Effect {
    Transmit(Vec<u8>),
    Deliver(Bytes),
    NotifyStateChange(bool),
    PostSendResult(bool),
    ArmResponseTimer,
    CancelResponseTimer,
}

struct Session {
    config: LinkConfig,
    runtime: Runtime,
    timer: Timer,
    listener: Rc<RefCell<dyn LinkListener>>,
    transmitter: Rc<RefCell<dyn LinkTransmitter>>,

    online: bool,

    // primary (send) side
    primary: PrimaryState,
    link_is_reset: bool,
    next_fcb: bool,
    retries_remaining: usize,
    pending: Option<Bytes>,

    // secondary (receive) side
    secondary: SecondaryState,
    expected_fcb: bool,

    tx_in_flight: Option<TxOwner>,
    deferred_tx: Option<(TxOwner, Vec<u8>)>,

    stats: LinkStatistics,
}

impl Session {
    fn discard(&mut self, reason: DiscardReason, function: LinkFunction) {
        error!(code = %reason, ?function, "dropping received frame");
        self.stats.record(reason);
    }

    /// Hand a frame to the transport, or hold it if one is already in flight
    fn queue_transmit(&mut self, owner: TxOwner, frame: Vec<u8>, effects: &mut Vec<Effect>) {
        if self.tx_in_flight.is_none() {
            self.tx_in_flight = Some(owner);
            self.stats.frames_transmitted += 1;
            effects.push(Effect::Transmit(frame));
        } else {
            self.deferred_tx = Some((owner, frame));
        }
    }

    fn encode_ack(&self) -> Vec<u8> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        encoder::format_ack(
            &mut buffer,
            self.config.is_master,
            self.config.remote_addr,
            self.config.local_addr,
        )
        .expect("header-only frame always fits")
        .to_vec()
    }

    fn encode_link_status(&self) -> Vec<u8> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        encoder::format_link_status(
            &mut buffer,
            self.config.is_master,
            self.config.remote_addr,
            self.config.local_addr,
        )
        .expect("header-only frame always fits")
        .to_vec()
    }

    fn encode_reset(&self) -> Vec<u8> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        encoder::format_reset_link_states(
            &mut buffer,
            self.config.is_master,
            self.config.remote_addr,
            self.config.local_addr,
        )
        .expect("header-only frame always fits")
        .to_vec()
    }

    fn encode_pending_confirmed(&self) -> Vec<u8> {
        let payload = self.pending.as_deref().unwrap_or(&[]);
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        encoder::format_confirmed_user_data(
            &mut buffer,
            self.config.is_master,
            self.next_fcb,
            self.config.remote_addr,
            self.config.local_addr,
            payload,
        )
        .expect("payload validated at send")
        .to_vec()
    }

    fn encode_pending_unconfirmed(&self) -> Vec<u8> {
        let payload = self.pending.as_deref().unwrap_or(&[]);
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        encoder::format_unconfirmed_user_data(
            &mut buffer,
            self.config.is_master,
            self.config.remote_addr,
            self.config.local_addr,
            payload,
        )
        .expect("payload validated at send")
        .to_vec()
    }

    /// Terminal failure of the in-progress transaction: exactly one upstream
    /// callback, posted, and the primary machine returns to idle
    fn fail_transaction(&mut self, effects: &mut Vec<Effect>) {
        effects.push(Effect::CancelResponseTimer);
        self.primary = PrimaryState::Idle;
        self.pending = None;
        effects.push(Effect::PostSendResult(false));
    }

    fn handle_lower_layer_up(&mut self, effects: &mut Vec<Effect>) {
        if self.online {
            error!("lower layer reported up while already online");
            return;
        }
        self.online = true;
        effects.push(Effect::NotifyStateChange(true));
    }

    fn handle_lower_layer_down(&mut self, effects: &mut Vec<Effect>) {
        if !self.online {
            error!("lower layer reported down while already offline");
            return;
        }

        effects.push(Effect::CancelResponseTimer);
        if self.primary != PrimaryState::Idle {
            effects.push(Effect::PostSendResult(false));
        }

        self.online = false;
        self.primary = PrimaryState::Idle;
        self.pending = None;
        self.tx_in_flight = None;
        self.deferred_tx = None;

        // FCB knowledge does not survive an outage
        self.link_is_reset = false;
        self.next_fcb = true;
        self.secondary = SecondaryState::Unreset;
        self.expected_fcb = true;

        effects.push(Effect::NotifyStateChange(false));
    }

    fn handle_send(&mut self, payload: &[u8], effects: &mut Vec<Effect>) -> Result<(), LinkError> {
        if !self.online {
            error!("send requested while offline");
            return Err(LinkError::NotOnline);
        }
        if self.primary != PrimaryState::Idle {
            error!(code = "SEND_WHILE_BUSY", "send requested mid-transaction");
            return Err(LinkError::SendWhileBusy);
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
        }

        self.pending = Some(Bytes::copy_from_slice(payload));

        if !self.config.use_confirms {
            let frame = self.encode_pending_unconfirmed();
            self.primary = PrimaryState::SendingUnconfirmed;
            self.queue_transmit(TxOwner::Primary, frame, effects);
        } else if self.link_is_reset {
            self.retries_remaining = self.config.num_retry;
            let frame = self.encode_pending_confirmed();
            self.primary = PrimaryState::SendingConfirmed;
            self.queue_transmit(TxOwner::Primary, frame, effects);
        } else {
            self.retries_remaining = self.config.num_retry;
            let frame = self.encode_reset();
            self.primary = PrimaryState::ResettingLink;
            self.queue_transmit(TxOwner::Primary, frame, effects);
        }
        Ok(())
    }

    fn handle_transmit_result(&mut self, success: bool, effects: &mut Vec<Effect>) {
        if !self.online {
            error!("transmit result while offline");
            return;
        }
        let Some(owner) = self.tx_in_flight.take() else {
            error!("transmit result with no transmission in flight");
            return;
        };

        if owner == TxOwner::Primary {
            match self.primary {
                PrimaryState::SendingUnconfirmed => {
                    self.primary = PrimaryState::Idle;
                    self.pending = None;
                    effects.push(Effect::PostSendResult(success));
                }
                PrimaryState::SendingConfirmed => {
                    if success {
                        self.primary = PrimaryState::WaitForConfirm;
                        effects.push(Effect::ArmResponseTimer);
                    } else {
                        self.link_is_reset = false;
                        self.fail_transaction(effects);
                    }
                }
                PrimaryState::ResettingLink => {
                    if success {
                        effects.push(Effect::ArmResponseTimer);
                    } else {
                        self.fail_transaction(effects);
                    }
                }
                PrimaryState::Idle | PrimaryState::WaitForConfirm => {
                    error!("transmit result in unexpected primary state");
                }
            }
        }

        if let Some((owner, frame)) = self.deferred_tx.take() {
            self.tx_in_flight = Some(owner);
            self.stats.frames_transmitted += 1;
            effects.push(Effect::Transmit(frame));
        }
    }

    fn handle_response_timeout(&mut self, effects: &mut Vec<Effect>) {
        match self.primary {
            PrimaryState::ResettingLink => {
                if self.retries_remaining > 0 {
                    self.retries_remaining -= 1;
                    warn!(
                        remaining = self.retries_remaining,
                        "no ACK for link reset, retrying"
                    );
                    let frame = self.encode_reset();
                    self.queue_transmit(TxOwner::Primary, frame, effects);
                } else {
                    warn!("link reset retries exhausted, failing send");
                    self.fail_transaction(effects);
                }
            }
            PrimaryState::WaitForConfirm => {
                if self.retries_remaining > 0 {
                    self.retries_remaining -= 1;
                    warn!(
                        remaining = self.retries_remaining,
                        "no ACK for confirmed data, retransmitting"
                    );
                    let frame = self.encode_pending_confirmed();
                    self.primary = PrimaryState::SendingConfirmed;
                    self.queue_transmit(TxOwner::Primary, frame, effects);
                } else {
                    warn!("confirmed data retries exhausted, failing send");
                    // Next send must begin with a fresh RESET_LINK_STATES
                    self.link_is_reset = false;
                    self.fail_transaction(effects);
                }
            }
            _ => error!("response timeout in unexpected primary state"),
        }
    }

    /// Secondary sub-machine: frames sent by the peer's primary station
    fn handle_primary_frame(
        &mut self,
        function: LinkFunction,
        fcb: bool,
        payload: &[u8],
        effects: &mut Vec<Effect>,
    ) {
        match function {
            LinkFunction::PriResetLinkStates => {
                self.secondary = SecondaryState::Reset;
                self.expected_fcb = true;
                let frame = self.encode_ack();
                self.queue_transmit(TxOwner::Secondary, frame, effects);
            }
            LinkFunction::PriRequestLinkStatus => {
                let frame = self.encode_link_status();
                self.queue_transmit(TxOwner::Secondary, frame, effects);
            }
            LinkFunction::PriTestLinkStates => {
                if self.secondary == SecondaryState::Unreset {
                    warn!("link test received before any link reset");
                    return;
                }
                if fcb == self.expected_fcb {
                    self.expected_fcb = !self.expected_fcb;
                    let frame = self.encode_ack();
                    self.queue_transmit(TxOwner::Secondary, frame, effects);
                } else {
                    warn!(code = %DiscardReason::WrongFcb, "link test with stale frame-count bit");
                    self.stats.record(DiscardReason::WrongFcb);
                }
            }
            LinkFunction::PriConfirmedUserData => {
                if self.secondary == SecondaryState::Unreset {
                    self.discard(DiscardReason::UnexpectedLpdu, function);
                    return;
                }
                let frame = self.encode_ack();
                self.queue_transmit(TxOwner::Secondary, frame, effects);
                if fcb == self.expected_fcb {
                    self.expected_fcb = !self.expected_fcb;
                    effects.push(Effect::Deliver(Bytes::copy_from_slice(payload)));
                } else {
                    warn!(code = %DiscardReason::WrongFcb, "duplicate confirmed frame suppressed");
                    self.stats.record(DiscardReason::WrongFcb);
                }
            }
            LinkFunction::PriUnconfirmedUserData => {
                effects.push(Effect::Deliver(Bytes::copy_from_slice(payload)));
            }
            _ => unreachable!("secondary machine only sees PRI functions"),
        }
    }

    /// Primary sub-machine: responses from the peer's secondary station
    fn handle_secondary_frame(&mut self, function: LinkFunction, effects: &mut Vec<Effect>) {
        if self.tx_in_flight == Some(TxOwner::Primary) {
            // our own frame has not finished transmitting; no response can
            // legitimately refer to it yet
            self.discard(DiscardReason::UnexpectedLpdu, function);
            return;
        }

        match (self.primary, function) {
            (PrimaryState::ResettingLink, LinkFunction::SecAck) => {
                effects.push(Effect::CancelResponseTimer);
                self.link_is_reset = true;
                self.next_fcb = true;
                self.retries_remaining = self.config.num_retry;
                let frame = self.encode_pending_confirmed();
                self.primary = PrimaryState::SendingConfirmed;
                self.queue_transmit(TxOwner::Primary, frame, effects);
            }
            (PrimaryState::WaitForConfirm, LinkFunction::SecAck) => {
                effects.push(Effect::CancelResponseTimer);
                self.next_fcb = !self.next_fcb;
                self.primary = PrimaryState::Idle;
                self.pending = None;
                effects.push(Effect::PostSendResult(true));
            }
            (PrimaryState::WaitForConfirm, LinkFunction::SecNack) => {
                effects.push(Effect::CancelResponseTimer);
                self.link_is_reset = false;
                if self.retries_remaining > 0 {
                    self.retries_remaining -= 1;
                    warn!(
                        remaining = self.retries_remaining,
                        "NACK received, resetting link"
                    );
                    let frame = self.encode_reset();
                    self.primary = PrimaryState::ResettingLink;
                    self.queue_transmit(TxOwner::Primary, frame, effects);
                } else {
                    warn!("NACK received with no retries left, failing send");
                    self.fail_transaction(effects);
                }
            }
            (
                PrimaryState::ResettingLink | PrimaryState::WaitForConfirm,
                LinkFunction::SecNotSupported,
            ) => {
                error!("peer refused the request, failing send");
                self.link_is_reset = false;
                self.fail_transaction(effects);
            }
            _ => {
                self.discard(DiscardReason::UnexpectedLpdu, function);
            }
        }
    }
}

/// The link layer: framed, optionally confirmed, point-to-point exchange
/// with a single remote peer
///
/// Cloning yields another handle to the same session. All methods must be
/// invoked from the runtime's thread.
#[derive(Clone)]
pub struct LinkLayer {
    session: Rc<RefCell<Session>>,
}

impl LinkLayer {
    /// Create a link layer bound to its runtime, peer callbacks and config
    pub fn new(
        runtime: &Runtime,
        config: LinkConfig,
        listener: Rc<RefCell<dyn LinkListener>>,
        transmitter: Rc<RefCell<dyn LinkTransmitter>>,
    ) -> Self {
        let timer = runtime.timer();
        Self {
            session: Rc::new(RefCell::new(Session {
                config,
                runtime: runtime.clone(),
                timer,
                listener,
                transmitter,
                online: false,
                primary: PrimaryState::Idle,
                link_is_reset: false,
                next_fcb: true,
                retries_remaining: 0,
                pending: None,
                secondary: SecondaryState::Unreset,
                expected_fcb: true,
                tx_in_flight: None,
                deferred_tx: None,
                stats: LinkStatistics::default(),
            })),
        }
    }

    /// The transport is available; transitions offline to online
    pub fn on_lower_layer_up(&self) {
        let mut effects = Vec::new();
        self.session.borrow_mut().handle_lower_layer_up(&mut effects);
        self.execute(effects);
    }

    /// The transport is gone; aborts any transaction with a single failure
    pub fn on_lower_layer_down(&self) {
        let mut effects = Vec::new();
        self.session
            .borrow_mut()
            .handle_lower_layer_down(&mut effects);
        self.execute(effects);
    }

    /// A decoded LPDU arrived from the transport
    #[allow(clippy::too_many_arguments)]
    pub fn on_frame(
        &self,
        function: LinkFunction,
        is_master: bool,
        fcb: bool,
        fcv: bool,
        dest: u16,
        src: u16,
        payload: &[u8],
    ) {
        let _ = fcv; // FCB is compared directly; FCV is set on everything we emit
        let mut effects = Vec::new();
        {
            let mut session = self.session.borrow_mut();
            if !session.online {
                error!("frame received while offline");
                return;
            }
            session.stats.frames_received += 1;

            if is_master == session.config.is_master {
                session.discard(DiscardReason::WrongMasterBit, function);
            } else if src != session.config.remote_addr {
                session.discard(DiscardReason::UnknownSource, function);
            } else if dest != session.config.local_addr {
                session.discard(DiscardReason::UnknownDestination, function);
            } else if function.is_primary() {
                session.handle_primary_frame(function, fcb, payload, &mut effects);
            } else {
                session.handle_secondary_frame(function, &mut effects);
            }
        }
        self.execute(effects);
    }

    /// Transmit a user payload to the peer; fails fast when busy or offline
    pub fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let mut effects = Vec::new();
        let result = self.session.borrow_mut().handle_send(payload, &mut effects);
        self.execute(effects);
        result
    }

    /// The transport finished the most recent [`LinkTransmitter::transmit`]
    pub fn on_transmit_result(&self, success: bool) {
        let mut effects = Vec::new();
        self.session
            .borrow_mut()
            .handle_transmit_result(success, &mut effects);
        self.execute(effects);
    }

    /// Whether the lower layer is up
    pub fn is_online(&self) -> bool {
        self.session.borrow().online
    }

    /// Snapshot of the link's counters
    pub fn statistics(&self) -> LinkStatistics {
        self.session.borrow().stats
    }

    fn on_response_timeout(&self) {
        let mut effects = Vec::new();
        self.session
            .borrow_mut()
            .handle_response_timeout(&mut effects);
        self.execute(effects);
    }

    /// Run deferred effects with the session borrow released, so listener and
    /// transport callbacks may re-enter the link layer
    fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transmit(frame) => {
                    let transmitter = self.session.borrow().transmitter.clone();
                    transmitter.borrow_mut().transmit(&frame);
                }
                Effect::Deliver(payload) => {
                    let listener = self.session.borrow().listener.clone();
                    listener.borrow_mut().on_receive(&payload);
                }
                Effect::NotifyStateChange(online) => {
                    let listener = self.session.borrow().listener.clone();
                    listener.borrow_mut().on_state_change(online);
                }
                Effect::PostSendResult(success) => {
                    let (runtime, listener) = {
                        let session = self.session.borrow();
                        (session.runtime.clone(), session.listener.clone())
                    };
                    runtime.post(move || listener.borrow_mut().on_send_result(success));
                }
                Effect::ArmResponseTimer => {
                    let session = self.session.borrow();
                    let deadline = session.runtime.now() + session.config.response_timeout;
                    let weak: Weak<RefCell<Session>> = Rc::downgrade(&self.session);
                    session.timer.restart(deadline, move || {
                        if let Some(session) = weak.upgrade() {
                            LinkLayer { session }.on_response_timeout();
                        }
                    });
                }
                Effect::CancelResponseTimer => {
                    self.session.borrow().timer.cancel();
                }
            }
        }
    }
}
