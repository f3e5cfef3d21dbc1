//! Property tests for session windows and link credit.

mod common;

use amqprims_codec::Flow;
use amqprims_engine::{EngineEvent, LinkCredit, SessionWindow};
use bytes::Bytes;
use proptest::prelude::*;

use common::{config, events, Pair};

#[derive(Debug, Clone)]
enum WindowOp {
    Send,
    Receive,
    RemoteFlow { lag: u32, window: u32 },
    Replenish,
}

fn window_op() -> impl Strategy<Value = WindowOp> {
    prop_oneof![
        3 => Just(WindowOp::Send),
        3 => Just(WindowOp::Receive),
        1 => (0u32..4, 0u32..8).prop_map(|(lag, window)| WindowOp::RemoteFlow { lag, window }),
        1 => Just(WindowOp::Replenish),
    ]
}

#[derive(Debug, Clone)]
enum CreditOp {
    Grant(u32),
    Consume,
    ReceiverFlow { behind: u32, credit: u32, drain: bool },
    Drained,
}

fn credit_op() -> impl Strategy<Value = CreditOp> {
    prop_oneof![
        1 => (0u32..5).prop_map(CreditOp::Grant),
        3 => Just(CreditOp::Consume),
        1 => (0u32..3, 0u32..8, any::<bool>())
            .prop_map(|(behind, credit, drain)| CreditOp::ReceiverFlow { behind, credit, drain }),
        1 => Just(CreditOp::Drained),
    ]
}

proptest! {
    /// Windows never go negative and a refused transfer changes nothing
    #[test]
    fn session_window_accounting(
        initial in any::<u32>(),
        incoming in 1u32..8,
        ops in prop::collection::vec(window_op(), 0..64),
    ) {
        let mut window = SessionWindow::new(initial, incoming, 8);
        let mut peer_window = 0;
        for op in ops {
            let before = window.clone();
            match op {
                WindowOp::Send => {
                    if window.try_send_transfer() {
                        prop_assert_eq!(window.outgoing_window(), before.outgoing_window() - 1);
                        prop_assert_eq!(
                            window.next_outgoing_id(),
                            before.next_outgoing_id().wrapping_add(1)
                        );
                    } else {
                        prop_assert_eq!(before.outgoing_window(), 0);
                        prop_assert_eq!(&window, &before);
                    }
                }
                WindowOp::Receive => {
                    if window.try_receive_transfer() {
                        prop_assert_eq!(window.incoming_window(), before.incoming_window() - 1);
                        prop_assert_eq!(
                            window.next_incoming_id(),
                            before.next_incoming_id().wrapping_add(1)
                        );
                    } else {
                        prop_assert_eq!(before.incoming_window(), 0);
                        prop_assert_eq!(&window, &before);
                    }
                }
                WindowOp::RemoteFlow { lag, window: granted } => {
                    let flow = Flow {
                        next_incoming_id: Some(window.next_outgoing_id().wrapping_sub(lag)),
                        incoming_window: granted,
                        ..Flow::default()
                    };
                    window.on_remote_flow(&flow);
                    peer_window = granted;
                    prop_assert_eq!(window.outgoing_window(), granted.saturating_sub(lag));
                }
                WindowOp::Replenish => {
                    let flow = window.next_flow(true);
                    prop_assert_eq!(flow.incoming_window, incoming);
                    prop_assert_eq!(window.incoming_window(), incoming);
                }
            }
            prop_assert!(window.incoming_window() <= incoming);
            prop_assert!(window.outgoing_window() <= peer_window);
        }
    }

    /// Credit moves one unit per delivery and drained credit is counted
    #[test]
    fn link_credit_accounting(ops in prop::collection::vec(credit_op(), 0..64)) {
        let mut credit = LinkCredit::new(0);
        for op in ops {
            let before = credit.clone();
            match op {
                CreditOp::Grant(n) => {
                    credit.grant(n);
                    prop_assert_eq!(credit.credit(), before.credit() + n);
                }
                CreditOp::Consume => {
                    if credit.try_consume() {
                        prop_assert_eq!(credit.credit(), before.credit() - 1);
                        prop_assert_eq!(
                            credit.delivery_count(),
                            before.delivery_count().wrapping_add(1)
                        );
                    } else {
                        prop_assert_eq!(before.credit(), 0);
                        prop_assert_eq!(&credit, &before);
                    }
                }
                CreditOp::ReceiverFlow { behind, credit: granted, drain } => {
                    let receiver_count = credit.delivery_count().wrapping_sub(behind);
                    credit.on_receiver_flow(Some(receiver_count), granted, drain);
                    prop_assert_eq!(credit.credit(), granted.saturating_sub(behind));
                    prop_assert_eq!(credit.drain(), drain);
                }
                CreditOp::Drained => {
                    credit.drained();
                    prop_assert_eq!(credit.credit(), 0);
                    prop_assert!(!credit.drain());
                    prop_assert_eq!(
                        credit.delivery_count(),
                        before.delivery_count().wrapping_add(before.credit())
                    );
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A receiver granting `credit` gets exactly as many deliveries as it allowed
    #[test]
    fn deliveries_bounded_by_credit(credit in 0u32..8, messages in 0usize..8) {
        let (mut pair, session) = Pair::open(config("client"), config("server"));
        let (sender, receiver) = pair.link(session, "bounded");
        if credit > 0 {
            pair.server.receiver(receiver).unwrap().add_credit(credit).unwrap();
        }
        pair.pump().unwrap();

        let mut sent = 0;
        for i in 0..messages {
            let mut sender = pair.client.sender(sender).unwrap();
            if !sender.is_sendable() {
                break;
            }
            let mut delivery = sender.next_delivery().unwrap();
            delivery.write_bytes(Bytes::from(vec![i as u8; 16])).unwrap();
            sent += 1;
        }
        pair.pump().unwrap();

        let received = events(&mut pair.server)
            .into_iter()
            .filter(|event| matches!(event, EngineEvent::DeliveryRead(_)))
            .count();
        let expected = (credit as usize).min(messages);
        prop_assert_eq!(sent, expected);
        prop_assert_eq!(received, expected);
        prop_assert_eq!(
            pair.server.receiver(receiver).unwrap().credit() as usize,
            credit as usize - expected
        );
    }
}
