//! Drive a confirmed exchange between a master link and a scripted peer.
//!
//! The "wire" is a pair of in-memory queues; the peer is the outstation side
//! of the handshake, answering each primary frame by hand with the encoder.
//!
//! Run with: cargo run --example link_exchange

use dnp3link_core::constants::MAX_FRAME_SIZE;
use dnp3link_core::decoder::decode_frame;
use dnp3link_core::encoder::format_ack;
use dnp3link_core::link::{LinkLayer, LinkListener, LinkTransmitter};
use dnp3link_core::runtime::Runtime;
use dnp3link_core::types::{LinkConfig, LinkFunction};
use std::cell::RefCell;
use std::rc::Rc;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X} ", b)).collect()
}

#[derive(Default)]
struct Printer;

impl LinkListener for Printer {
    fn on_receive(&mut self, payload: &[u8]) {
        println!("upper layer <- {} payload bytes", payload.len());
    }

    fn on_send_result(&mut self, success: bool) {
        println!("upper layer <- send result: {}", success);
    }

    fn on_state_change(&mut self, online: bool) {
        println!("upper layer <- link online: {}", online);
    }
}

#[derive(Default)]
struct Wire {
    outbound: Vec<Vec<u8>>,
}

impl LinkTransmitter for Wire {
    fn transmit(&mut self, frame: &[u8]) {
        println!("wire -> {}", to_hex(frame));
        self.outbound.push(frame.to_vec());
    }
}

fn main() {
    let runtime = Runtime::new();
    let listener = Rc::new(RefCell::new(Printer));
    let wire = Rc::new(RefCell::new(Wire::default()));

    let mut config = LinkConfig::master_default();
    config.use_confirms = true;
    config.num_retry = 1;

    let link = LinkLayer::new(&runtime, config, listener, wire.clone());
    link.on_lower_layer_up();

    // master asks for a confirmed transfer
    link.send(b"measurement poll request").unwrap();

    // the peer ACKs the reset, then ACKs the data
    for _ in 0..2 {
        let frame = wire.borrow_mut().outbound.pop().expect("master emitted a frame");
        let (decoded, _) = decode_frame(&frame).expect("master frames are well-formed");
        println!(
            "peer   <- {:?} ({} payload bytes)",
            decoded.header.control.function,
            decoded.payload.len()
        );
        link.on_transmit_result(true);

        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let ack = format_ack(&mut buffer, false, 1, 1024).unwrap();
        println!("peer   -> {}", to_hex(ack));
        link.on_frame(LinkFunction::SecAck, false, false, false, 1, 1024, &[]);
    }

    runtime.run_many();
    println!("statistics: {:?}", link.statistics());
}
